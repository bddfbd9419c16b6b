//! Tests for behavior around missing files.

use super::*;

#[test]
fn missing_input() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write(
        "build.sweet",
        &[TOUCH_RULE, "build out: touch in", ""].join("\n"),
    )?;

    let out = space.run(&mut sweet_command(vec!["out"]))?;
    assert!(!out.status.success());
    assert_stderr_contains(&out, "missing and no known rule to make it");
    assert!(!space.exists("out"));
    Ok(())
}

#[cfg(unix)]
#[test]
fn missing_generated() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write(
        "build.sweet",
        &[
            TOUCH_RULE,
            "rule echo",
            "  command = echo $out",
            "  description = echo $out",
            "build mid: echo",      // never writes output
            "build out: touch mid", // uses never-written output
            "",
        ]
        .join("\n"),
    )?;

    let out = space.run_expect(&mut sweet_command(vec!["out"]))?;
    assert_output_contains(&out, "echo mid");
    assert_output_contains(&out, "touch out");
    Ok(())
}

#[test]
fn missing_phony() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write(
        "build.sweet",
        &[
            TOUCH_RULE,
            "build order_only: phony",
            "build out: touch || order_only",
            "",
        ]
        .join("\n"),
    )?;

    let out = space.run_expect(&mut sweet_command(vec!["out"]))?;
    assert_output_contains(&out, "touch out");

    let out = space.run_expect(&mut sweet_command(vec!["out"]))?;
    assert_output_contains(&out, "sweet: no work to do");
    Ok(())
}
