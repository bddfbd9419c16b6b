use crate::e2e::*;

#[test]
fn empty_file() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write("build.sweet", "")?;
    let out = space.run(&mut sweet_command(vec![]))?;
    assert!(!out.status.success());
    assert_output_contains(&out, "no path specified and no default");
    Ok(())
}

#[test]
fn basic_build() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write(
        "build.sweet",
        &[TOUCH_RULE, "build out: touch in", ""].join("\n"),
    )?;
    space.write("in", "")?;
    let out = space.run_expect(&mut sweet_command(vec!["out"]))?;
    assert!(space.exists("out"));
    assert_output_contains(&out, "touch out");
    assert_output_contains(&out, "sweet: ran 1 tasks, now up to date");

    let out = space.run_expect(&mut sweet_command(vec!["out"]))?;
    assert_output_contains(&out, "sweet: no work to do");
    assert_output_not_contains(&out, "touch out");
    Ok(())
}

#[test]
fn create_subdir() -> anyhow::Result<()> {
    // Output directories are created before the command runs.
    let space = TestSpace::new()?;
    space.write(
        "build.sweet",
        &[TOUCH_RULE, "build subdir/out: touch in", ""].join("\n"),
    )?;
    space.write("in", "")?;
    space.run_expect(&mut sweet_command(vec!["subdir/out"]))?;
    assert!(space.exists("subdir/out"));
    Ok(())
}

#[test]
fn defaults() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write(
        "build.sweet",
        &[
            TOUCH_RULE,
            "build a: touch in",
            "build b: touch in",
            "default a",
            "",
        ]
        .join("\n"),
    )?;
    space.write("in", "")?;
    space.run_expect(&mut sweet_command(vec![]))?;
    assert!(space.exists("a"));
    assert!(!space.exists("b"));
    Ok(())
}

#[test]
fn unknown_target() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write(
        "build.sweet",
        &[TOUCH_RULE, "build out: touch in", ""].join("\n"),
    )?;
    let out = space.run(&mut sweet_command(vec!["nope"]))?;
    assert!(!out.status.success());
    assert_output_contains(&out, "unknown target 'nope'");
    Ok(())
}

#[test]
fn phony_groups_outputs() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write(
        "build.sweet",
        &[
            TOUCH_RULE,
            "build a: touch in",
            "build b: touch in",
            "build all: phony a b",
            "default all",
            "",
        ]
        .join("\n"),
    )?;
    space.write("in", "")?;
    let out = space.run_expect(&mut sweet_command(vec![]))?;
    assert!(space.exists("a"));
    assert!(space.exists("b"));
    assert!(!space.exists("all"));
    assert_output_contains(&out, "sweet: ran 2 tasks, now up to date");
    Ok(())
}

#[cfg(unix)]
#[test]
fn variables_expand() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write(
        "build.sweet",
        "
greeting = hello
rule write
  command = echo $greeting $who > $out
  description = write $out
build out: write
  who = world
default out
",
    )?;
    space.run_expect(&mut sweet_command(vec![]))?;
    assert_eq!(space.read("out")?, b"hello world\n");
    Ok(())
}

#[test]
fn parse_error_fails() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write("build.sweet", "build out: nosuchrule\n")?;
    let out = space.run(&mut sweet_command(vec!["out"]))?;
    assert!(!out.status.success());
    assert_stderr_contains(&out, "unknown rule \"nosuchrule\"");
    Ok(())
}

#[cfg(unix)]
#[test]
fn failing_command() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write(
        "build.sweet",
        "
rule fail
  command = echo oops; exit 2
  description = fail $out
build out: fail
build next: fail out
default next
",
    )?;
    let out = space.run(&mut sweet_command(vec![]))?;
    assert!(!out.status.success());
    assert_output_contains(&out, "oops");
    assert_stderr_contains(&out, "failed with exit code 2");
    assert_stderr_contains(&out, "not visited because dependencies failed");
    Ok(())
}
