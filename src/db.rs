//! The graph file stores information about previous builds for determining
//! which targets are up to date: per target its files, last write time,
//! settings hash, built flag, and the implicit dependencies discovered while
//! building it.
//!
//! Layout: the magic string, a u32 version, then the root's record.  Each
//! record holds the target's own state, its implicit dependencies as tags,
//! and then its children's records recursively.  A tag is the target's
//! index in the graph that wrote the file; it is remapped on load.

use crate::densemap::Index;
use crate::error::{Error, Result};
use crate::graph::Graph;
use crate::target::{DependencyKind, Target, TargetId};
use rustc_hash::FxHashMap;
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

const MAGIC: &[u8] = b"Sweet Build Graph";
const VERSION: u32 = 1;
/// Lengths come from the file, so preallocation is capped; a corrupt
/// length then fails when the data runs out rather than up front.
const PREALLOCATE_LIMIT: usize = 1024;

struct Writer<W: Write> {
    w: W,
}

impl<W: Write> Writer<W> {
    fn write_u8(&mut self, n: u8) -> std::io::Result<()> {
        self.w.write_all(&[n])
    }

    fn write_u32(&mut self, n: u32) -> std::io::Result<()> {
        self.w.write_all(&n.to_le_bytes())
    }

    fn write_u64(&mut self, n: u64) -> std::io::Result<()> {
        self.w.write_all(&n.to_le_bytes())
    }

    fn write_len(&mut self, n: usize) -> std::io::Result<()> {
        self.write_u32(n as u32)
    }

    fn write_str(&mut self, s: &str) -> std::io::Result<()> {
        self.write_len(s.len())?;
        self.w.write_all(s.as_bytes())
    }

    fn write_graph(&mut self, graph: &Graph) -> std::io::Result<()> {
        self.w.write_all(MAGIC)?;
        self.write_u32(VERSION)?;
        self.write_target(graph, graph.root())?;
        self.w.flush()
    }

    fn write_target(&mut self, graph: &Graph, id: TargetId) -> std::io::Result<()> {
        let target = graph.target(id);
        self.write_u64(id.index() as u64)?;
        self.write_str(target.id())?;
        self.write_u8(target.anonymous() as u8)?;
        self.write_u32(target.anonymous_counter)?;
        self.write_u64(target.last_write_time())?;
        self.write_u64(target.hash())?;
        self.write_u8(target.built() as u8)?;
        self.write_len(target.filenames().len())?;
        for filename in target.filenames() {
            self.write_str(filename)?;
        }
        let implicit = target.dependencies(DependencyKind::Implicit);
        self.write_len(implicit.len())?;
        for dep in implicit {
            self.write_u64(dep.index() as u64)?;
        }
        self.write_len(target.children().len())?;
        for &child in target.children() {
            self.write_target(graph, child)?;
        }
        Ok(())
    }
}

struct BReader<R: Read> {
    r: R,
}

impl<R: Read> BReader<R> {
    fn read_u8(&mut self) -> std::io::Result<u8> {
        let mut buf = [0u8; 1];
        self.r.read_exact(&mut buf)?;
        Ok(buf[0])
    }

    fn read_u32(&mut self) -> std::io::Result<u32> {
        let mut buf = [0u8; 4];
        self.r.read_exact(&mut buf)?;
        Ok(u32::from_le_bytes(buf))
    }

    fn read_u64(&mut self) -> std::io::Result<u64> {
        let mut buf = [0u8; 8];
        self.r.read_exact(&mut buf)?;
        Ok(u64::from_le_bytes(buf))
    }

    fn read_len(&mut self) -> std::io::Result<usize> {
        Ok(self.read_u32()? as usize)
    }

    fn read_str(&mut self) -> std::io::Result<String> {
        let len = self.read_len()?;
        let mut buf = Vec::with_capacity(len.min(PREALLOCATE_LIMIT));
        (&mut self.r).take(len as u64).read_to_end(&mut buf)?;
        if buf.len() != len {
            return Err(std::io::ErrorKind::UnexpectedEof.into());
        }
        String::from_utf8(buf)
            .map_err(|err| std::io::Error::new(std::io::ErrorKind::InvalidData, err))
    }
}

/// State accumulated while reading records, resolved once all are read.
#[derive(Default)]
struct Loading {
    /// Maps tags in the file to ids in the new graph.
    ids: FxHashMap<u64, TargetId>,
    /// Implicit dependencies by tag, per new target.
    implicit: Vec<(TargetId, Vec<u64>)>,
}

fn read_target<R: Read>(
    r: &mut BReader<R>,
    graph: &mut Graph,
    parent: Option<TargetId>,
    loading: &mut Loading,
) -> std::io::Result<TargetId> {
    let tag = r.read_u64()?;
    let name = r.read_str()?;
    let anonymous = r.read_u8()? != 0;
    let mut target = Target::new(name, anonymous, parent);
    target.anonymous_counter = r.read_u32()?;
    let last_write_time = r.read_u64()?;
    let hash = r.read_u64()?;
    let built = r.read_u8()? != 0;
    let count = r.read_len()?;
    let mut filenames = Vec::with_capacity(count.min(PREALLOCATE_LIMIT));
    for _ in 0..count {
        filenames.push(r.read_str()?);
    }
    target.restore(last_write_time, hash, built, filenames);
    // The pending hash is recomputed by whoever declares the target; until
    // then it matches what was recorded.
    target.set_pending_hash(hash);

    let count = r.read_len()?;
    let mut implicit = Vec::with_capacity(count.min(PREALLOCATE_LIMIT));
    for _ in 0..count {
        implicit.push(r.read_u64()?);
    }

    let id = graph.push_target(target);
    loading.ids.insert(tag, id);
    if !implicit.is_empty() {
        loading.implicit.push((id, implicit));
    }

    let count = r.read_len()?;
    let mut children = Vec::with_capacity(count.min(PREALLOCATE_LIMIT));
    for _ in 0..count {
        children.push(read_target(r, graph, Some(id), loading)?);
    }
    graph.target_mut(id).children = children;
    Ok(id)
}

impl Graph {
    /// Write the persistent state of every target to `path`.
    pub fn save_binary(&self, path: &Path) -> Result<()> {
        let f = File::create(path).map_err(|err| Error::io(path, err))?;
        let mut w = Writer {
            w: BufWriter::new(f),
        };
        w.write_graph(self).map_err(|err| Error::io(path, err))
    }

    /// Replace this graph with the one stored at `path`.  A missing file
    /// leaves an empty graph; a file written by anything else, or by an
    /// incompatible version, is rejected.
    pub fn load_binary(&mut self, path: &Path) -> Result<()> {
        self.reset();
        self.set_filename(Some(path.to_string_lossy().into_owned()));
        let f = match File::open(path) {
            Ok(f) => f,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                self.recover();
                return Ok(());
            }
            Err(err) => return Err(Error::io(path, err)),
        };
        let mut r = BReader {
            r: BufReader::new(f),
        };

        let mut magic = vec![0u8; MAGIC.len()];
        let valid = r.r.read_exact(&mut magic).is_ok()
            && magic == MAGIC
            && matches!(r.read_u32(), Ok(VERSION));
        if !valid {
            self.recover();
            return Err(Error::VersionInvalid {
                path: path.to_path_buf(),
            });
        }

        let mut loading = Loading::default();
        self.clear_targets();
        match read_target(&mut r, self, None, &mut loading) {
            Ok(root) => self.set_root(root),
            Err(err) => {
                self.reset();
                self.recover();
                return Err(Error::io(path, err));
            }
        }
        for (id, tags) in loading.implicit {
            for tag in tags {
                if let Some(&dep) = loading.ids.get(&tag) {
                    self.add_implicit_dependency(id, dep);
                }
            }
        }
        self.recover();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("graph");

        let mut graph = Graph::new();
        let obj = graph.lookup("/out/foo.obj", None, None)?;
        let src = graph.lookup("/src/foo.cpp", None, None)?;
        let header = graph.lookup("/src/foo.h", None, None)?;
        graph.add_explicit_dependency(obj, src);
        graph.add_implicit_dependency(obj, header);
        {
            let t = graph.target_mut(obj);
            t.add_filename("/out/foo.obj");
            t.set_pending_hash(1234);
            t.set_built(true);
        }
        graph.save_binary(&path)?;

        let mut loaded = Graph::new();
        loaded.load_binary(&path)?;
        let obj = loaded.find("/out/foo.obj", None).unwrap();
        let header = loaded.find("/src/foo.h", None).unwrap();
        let t = loaded.target(obj);
        assert!(t.built());
        assert_eq!(t.hash(), 1234);
        assert_eq!(t.filenames(), &["/out/foo.obj".to_string()]);
        // Only implicit dependencies persist.
        assert_eq!(t.all_dependencies().collect::<Vec<_>>(), vec![header]);
        assert_eq!(loaded.path(obj), "/out/foo.obj");
        assert_eq!(
            loaded.cache_target(),
            loaded.find(&path.to_string_lossy(), None)
        );
        Ok(())
    }

    #[test]
    fn missing_file_is_empty() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let mut graph = Graph::new();
        graph.lookup("/stale", None, None)?;
        graph.load_binary(&dir.path().join("absent"))?;
        assert!(graph.find("/stale", None).is_none());
        assert!(graph.cache_target().is_some());
        Ok(())
    }

    #[test]
    fn rejects_foreign_file() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("graph");
        std::fs::write(&path, "Something Else Entirely")?;
        let mut graph = Graph::new();
        assert!(matches!(
            graph.load_binary(&path),
            Err(Error::VersionInvalid { .. })
        ));

        let mut bytes = MAGIC.to_vec();
        bytes.extend_from_slice(&(VERSION + 1).to_le_bytes());
        std::fs::write(&path, bytes)?;
        assert!(matches!(
            graph.load_binary(&path),
            Err(Error::VersionInvalid { .. })
        ));
        Ok(())
    }

    #[test]
    fn corrupt_lengths_fail_cleanly() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("graph");
        let mut bytes = MAGIC.to_vec();
        bytes.extend_from_slice(&VERSION.to_le_bytes());
        // Root tag, then a name claiming u32::MAX bytes with three present.
        bytes.extend_from_slice(&0u64.to_le_bytes());
        bytes.extend_from_slice(&u32::MAX.to_le_bytes());
        bytes.extend_from_slice(b"abc");
        std::fs::write(&path, &bytes)?;

        let mut graph = Graph::new();
        assert!(matches!(graph.load_binary(&path), Err(Error::Io { .. })));
        assert!(graph.cache_target().is_some());

        // A valid name followed by a huge filename count.
        let mut bytes = MAGIC.to_vec();
        bytes.extend_from_slice(&VERSION.to_le_bytes());
        bytes.extend_from_slice(&0u64.to_le_bytes());
        bytes.extend_from_slice(&0u32.to_le_bytes());
        bytes.push(0);
        bytes.extend_from_slice(&0u32.to_le_bytes());
        bytes.extend_from_slice(&0u64.to_le_bytes());
        bytes.extend_from_slice(&0u64.to_le_bytes());
        bytes.push(0);
        bytes.extend_from_slice(&u32::MAX.to_le_bytes());
        std::fs::write(&path, &bytes)?;
        assert!(matches!(graph.load_binary(&path), Err(Error::Io { .. })));
        Ok(())
    }

    #[test]
    fn anonymous_counter_survives() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("graph");
        let mut graph = Graph::new();
        let d = graph.lookup("/d", None, None)?;
        let a = graph.anonymous_target(d);
        graph.save_binary(&path)?;

        let mut loaded = Graph::new();
        loaded.load_binary(&path)?;
        let d = loaded.find("/d", None).unwrap();
        let b = loaded.anonymous_target(d);
        assert_ne!(loaded.target(b).id(), graph.target(a).id());
        Ok(())
    }
}
