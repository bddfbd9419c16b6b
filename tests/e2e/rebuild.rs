//! Tests for deciding what is out of date across runs.

use crate::e2e::*;

#[cfg(unix)]
#[test]
fn input_change_rebuilds() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write(
        "build.sweet",
        &[CAT_RULE, "build mid: cat in", "build out: cat mid", ""].join("\n"),
    )?;
    space.write("in", "one")?;
    let out = space.run_expect(&mut sweet_command(vec!["out"]))?;
    assert_output_contains(&out, "sweet: ran 2 tasks, now up to date");
    assert_eq!(space.read("out")?, b"one");

    space.age_all(10)?;
    space.write("in", "two")?;
    let out = space.run_expect(&mut sweet_command(vec!["out"]))?;
    assert_output_contains(&out, "cat mid");
    assert_output_contains(&out, "cat out");
    assert_eq!(space.read("out")?, b"two");

    let out = space.run_expect(&mut sweet_command(vec!["out"]))?;
    assert_output_contains(&out, "sweet: no work to do");
    Ok(())
}

#[cfg(unix)]
#[test]
fn command_change_rebuilds() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write(
        "build.sweet",
        "
rule write
  command = echo first > $out
build out: write
",
    )?;
    space.run_expect(&mut sweet_command(vec!["out"]))?;
    assert_eq!(space.read("out")?, b"first\n");

    space.age_all(10)?;
    space.write(
        "build.sweet",
        "
rule write
  command = echo second > $out
build out: write
",
    )?;
    let out = space.run_expect(&mut sweet_command(vec!["out"]))?;
    assert_output_contains(&out, "sweet: ran 1 tasks, now up to date");
    assert_eq!(space.read("out")?, b"second\n");
    Ok(())
}

#[cfg(unix)]
#[test]
fn failed_command_reruns() -> anyhow::Result<()> {
    // The command writes its output before failing; the output must not be
    // taken as up to date next time.
    let space = TestSpace::new()?;
    space.write(
        "build.sweet",
        "
rule flaky
  command = touch $out; test -f ok
  description = flaky $out
build out: flaky
",
    )?;
    let out = space.run(&mut sweet_command(vec!["out"]))?;
    assert!(!out.status.success());
    assert!(space.exists("out"));

    space.write("ok", "")?;
    let out = space.run_expect(&mut sweet_command(vec!["out"]))?;
    assert_output_contains(&out, "flaky out");

    let out = space.run_expect(&mut sweet_command(vec!["out"]))?;
    assert_output_contains(&out, "sweet: no work to do");
    Ok(())
}

#[test]
fn deleted_output_rebuilds() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write(
        "build.sweet",
        &[TOUCH_RULE, "build out: touch in", ""].join("\n"),
    )?;
    space.write("in", "")?;
    space.run_expect(&mut sweet_command(vec!["out"]))?;
    space.remove("out")?;

    let out = space.run_expect(&mut sweet_command(vec!["-d", "explain", "out"]))?;
    assert_output_contains(&out, "is missing");
    assert_output_contains(&out, "touch out");
    assert!(space.exists("out"));
    Ok(())
}

#[test]
fn order_only_does_not_rebuild() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write(
        "build.sweet",
        &[
            TOUCH_RULE,
            "build gen: touch in",
            "build out: touch in || gen",
            "",
        ]
        .join("\n"),
    )?;
    space.write("in", "")?;
    let out = space.run_expect(&mut sweet_command(vec!["out"]))?;
    assert_output_contains(&out, "touch gen");
    assert_output_contains(&out, "touch out");
    Ok(())
}
