//! Tests for dependencies discovered while building.

use crate::e2e::*;

#[cfg(unix)]
const GEN_RULE: &str = "
rule gen
  command = cat in > $out && echo \"$out: in extra\" > ${out}.d
  description = gen $out
  depfile = ${out}.d
";

#[cfg(unix)]
#[test]
fn depfile_changes_rebuild() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write("build.sweet", &[GEN_RULE, "build out: gen", ""].join("\n"))?;
    space.write("in", "")?;
    space.write("extra", "")?;

    let out = space.run_expect(&mut sweet_command(vec!["out"]))?;
    assert_output_contains(&out, "gen out");

    let out = space.run_expect(&mut sweet_command(vec!["out"]))?;
    assert_output_contains(&out, "sweet: no work to do");

    // A file only the depfile mentions now triggers a rebuild.
    space.age_all(10)?;
    space.write("extra", "changed")?;
    let out = space.run_expect(&mut sweet_command(vec!["-d", "explain", "out"]))?;
    assert_output_contains(&out, "/extra is newer");
    assert_output_contains(&out, "gen out");

    let out = space.run_expect(&mut sweet_command(vec!["out"]))?;
    assert_output_contains(&out, "sweet: no work to do");
    Ok(())
}

#[cfg(unix)]
#[test]
fn depfile_missing_dependency_rebuilds() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write("build.sweet", &[GEN_RULE, "build out: gen", ""].join("\n"))?;
    space.write("in", "")?;
    space.write("extra", "")?;
    space.run_expect(&mut sweet_command(vec!["out"]))?;

    space.remove("extra")?;
    space.age("out", 10)?;
    let out = space.run(&mut sweet_command(vec!["out"]))?;
    // The command itself doesn't read extra, so it runs fine again.
    assert!(out.status.success());
    assert_output_contains(&out, "gen out");
    Ok(())
}
