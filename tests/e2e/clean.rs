use crate::e2e::*;

#[test]
fn clean_removes_outputs() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write(
        "build.sweet",
        &[
            TOUCH_RULE,
            "build mid: touch in",
            "build out: touch mid",
            "default out",
            "",
        ]
        .join("\n"),
    )?;
    space.write("in", "")?;
    space.run_expect(&mut sweet_command(vec![]))?;
    assert!(space.exists("mid"));
    assert!(space.exists("out"));

    let out = space.run_expect(&mut sweet_command(vec!["-t", "clean"]))?;
    assert_output_contains(&out, "sweet: removed 2 files");
    assert!(!space.exists("mid"));
    assert!(!space.exists("out"));
    // Sources are left alone.
    assert!(space.exists("in"));

    let out = space.run_expect(&mut sweet_command(vec![]))?;
    assert_output_contains(&out, "sweet: ran 2 tasks, now up to date");
    Ok(())
}

#[test]
fn list_targets() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write(
        "build.sweet",
        &[
            TOUCH_RULE,
            "build out: touch in",
            "build all: phony out",
            "",
        ]
        .join("\n"),
    )?;
    let out = space.run_expect(&mut sweet_command(vec!["-t", "targets"]))?;
    assert_output_contains(&out, "/out: touch");
    assert_output_contains(&out, "/all: phony");
    Ok(())
}
