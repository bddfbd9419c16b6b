//! Tests for buildfiles that include other buildfiles.

use crate::e2e::*;

#[test]
fn include_shares_scope() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write(
        "build.sweet",
        &[TOUCH_RULE, "include rules.sweet", "default out", ""].join("\n"),
    )?;
    space.write("rules.sweet", "build out: touch in\n")?;
    space.write("in", "")?;
    let out = space.run_expect(&mut sweet_command(vec![]))?;
    assert_output_contains(&out, "touch out");
    assert!(space.exists("out"));
    Ok(())
}

#[test]
fn include_resolves_paths_in_its_directory() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write(
        "build.sweet",
        &[TOUCH_RULE, "include sub/build.sweet", "default sub/out", ""].join("\n"),
    )?;
    space.write("sub/build.sweet", "build out: touch in\n")?;
    space.write("sub/in", "")?;
    space.run_expect(&mut sweet_command(vec![]))?;
    assert!(space.exists("sub/out"));
    assert!(!space.exists("out"));
    Ok(())
}

#[test]
fn missing_include_fails() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write("build.sweet", "include nope.sweet\n")?;
    let out = space.run(&mut sweet_command(vec![]))?;
    assert!(!out.status.success());
    assert_stderr_contains(&out, "nope.sweet");
    Ok(())
}

#[test]
fn edited_include_reloads() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write(
        "build.sweet",
        &[TOUCH_RULE, "include rules.sweet", ""].join("\n"),
    )?;
    space.write("rules.sweet", "build a: touch in\ndefault a\n")?;
    space.write("in", "")?;
    space.run_expect(&mut sweet_command(vec![]))?;
    assert!(space.exists("a"));

    space.age_all(10)?;
    space.write("rules.sweet", "build b: touch in\ndefault b\n")?;
    let out = space.run_expect(&mut sweet_command(vec![]))?;
    assert_output_contains(&out, "touch b");
    assert!(space.exists("b"));
    Ok(())
}
