//! Represents parsed buildfile strings with embedded variable references,
//! e.g. `cc -c $in -o $out`, and mechanisms for expanding those into plain
//! strings.

use rustc_hash::FxHashMap;

/// An environment providing a mapping of variable name to variable value.
/// A given EvalString may need multiple environments in order to be fully
/// expanded.
pub trait Env {
    fn get_var(&self, var: &str) -> Option<String>;
}

/// One token within an EvalString, either literal text or a variable reference.
#[derive(Debug, Clone, PartialEq)]
pub enum EvalPart<T: AsRef<str>> {
    Literal(T),
    VarRef(T),
}

/// A parsed but unexpanded variable-reference string, e.g. "cc $in -o $out".
/// EvalString<&str> borrows the parser's input and is used for values
/// expanded immediately, like top-level variables; EvalString<String> is
/// kept around for delayed expansion, like the variables of `rule` blocks.
#[derive(Debug, Clone, PartialEq)]
pub struct EvalString<T: AsRef<str>>(Vec<EvalPart<T>>);

impl<T: AsRef<str>> EvalString<T> {
    pub fn new(parts: Vec<EvalPart<T>>) -> Self {
        EvalString(parts)
    }

    /// Expand the string, looking up each variable in the first env that
    /// has it.  Unknown variables expand to nothing.
    pub fn evaluate(&self, envs: &[&dyn Env]) -> String {
        let mut val = String::new();
        for part in &self.0 {
            match part {
                EvalPart::Literal(s) => val.push_str(s.as_ref()),
                EvalPart::VarRef(v) => {
                    if let Some(var) = envs.iter().find_map(|env| env.get_var(v.as_ref())) {
                        val.push_str(&var);
                    }
                }
            }
        }
        val
    }

    pub fn parts(&self) -> &[EvalPart<T>] {
        &self.0
    }
}

impl EvalString<&str> {
    pub fn into_owned(self) -> EvalString<String> {
        EvalString(
            self.0
                .into_iter()
                .map(|part| match part {
                    EvalPart::Literal(s) => EvalPart::Literal(s.to_owned()),
                    EvalPart::VarRef(s) => EvalPart::VarRef(s.to_owned()),
                })
                .collect(),
        )
    }
}

/// A single scope's worth of variable definitions, already expanded.
#[derive(Debug, Default, Clone)]
pub struct Vars(FxHashMap<String, String>);

impl Vars {
    pub fn new() -> Vars {
        Vars::default()
    }

    pub fn insert(&mut self, key: impl Into<String>, val: String) {
        self.0.insert(key.into(), val);
    }

    pub fn get(&self, key: &str) -> Option<&String> {
        self.0.get(key)
    }
}

impl Env for Vars {
    fn get_var(&self, var: &str) -> Option<String> {
        self.get(var).cloned()
    }
}

/// Variable definitions whose expansion waits until the scope they are
/// used in is known, as in a `rule` block.
#[derive(Debug, Default, Clone)]
pub struct LazyVars(Vec<(String, EvalString<String>)>);

impl LazyVars {
    pub fn new() -> Self {
        LazyVars::default()
    }

    pub fn get(&self, key: &str) -> Option<&EvalString<String>> {
        self.0.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    pub fn insert(&mut self, key: String, val: EvalString<String>) {
        match self.0.iter_mut().find(|(k, _)| *k == key) {
            Some(entry) => entry.1 = val,
            None => self.0.push((key, val)),
        }
    }

    pub fn keyvals(&self) -> &[(String, EvalString<String>)] {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_env_wins() {
        let mut outer = Vars::new();
        outer.insert("cc", "gcc".to_string());
        outer.insert("flags", "-O2".to_string());
        let mut inner = Vars::new();
        inner.insert("flags", "-g".to_string());

        let eval = EvalString::new(vec![
            EvalPart::VarRef("cc"),
            EvalPart::Literal(" "),
            EvalPart::VarRef("flags"),
            EvalPart::VarRef("unknown"),
        ]);
        assert_eq!(eval.evaluate(&[&inner, &outer]), "gcc -g");
        assert_eq!(eval.evaluate(&[&outer]), "gcc -O2");
    }

    #[test]
    fn lazy_vars_replace() {
        let mut vars = LazyVars::new();
        vars.insert("a".into(), EvalString::new(vec![EvalPart::Literal("1".into())]));
        vars.insert("a".into(), EvalString::new(vec![EvalPart::Literal("2".into())]));
        assert_eq!(vars.keyvals().len(), 1);
        assert_eq!(vars.get("a").map(|v| v.evaluate(&[])), Some("2".to_string()));
    }
}
