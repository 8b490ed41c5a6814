mod common;

use common::TestProject;
use std::fs;

#[test]
fn init_scaffolds_the_intelligence_layer() {
    let p = TestProject::new();
    let (code, stdout, stderr) = p.run(&["init"]);
    assert_eq!(code, 0, "stderr: {stderr}");
    assert!(stdout.starts_with("Setup complete."));

    for rel in [
        ".pilot/internal/change-ledger.log",
        ".pilot/internal/.onboarding",
        ".pilot/internal/.gitignore",
        ".pilot/internal/synthesis-instructions.md",
        ".pilot/internal/dependency-map.md",
        ".pilot/active-context.md",
        ".pilot/progress.md",
        ".claude/project-pilot-initialized",
        ".claude/project-pilot.toml",
    ] {
        assert!(p.path(rel).is_file(), "missing {rel}");
    }
    assert!(p.path(".pilot/modules").is_dir());
    assert_eq!(
        fs::read_to_string(p.path(".claude/.gitignore")).unwrap(),
        "# Project Pilot runtime files: machine-local, do not commit\n\
         .pp-snapshot/\nproject-pilot-initialized\n.pp-no-guard\n"
    );
}

#[test]
fn init_twice_does_not_duplicate_ignore_entries() {
    let p = TestProject::new();
    p.run(&["init"]);
    let first = fs::read_to_string(p.path(".claude/.gitignore")).unwrap();
    p.run(&["init"]);
    assert_eq!(fs::read_to_string(p.path(".claude/.gitignore")).unwrap(), first);
}

#[test]
fn finalize_records_created_files_and_ends_onboarding() {
    let p = TestProject::new();
    p.run(&["init"]);
    fs::write(p.path("CLAUDE.md"), "# app\n").unwrap();
    fs::write(p.path(".pilot/modules/auth.md"), "# auth\n").unwrap();

    let (code, stdout, stderr) = p.run(&["finalize"]);
    assert_eq!(code, 0, "stderr: {stderr}");
    assert!(stdout.contains("CREATED CLAUDE.md"));
    assert!(stdout.contains("CREATED .pilot/modules/auth.md"));
    assert!(stdout.trim_end().ends_with("Project Pilot initialized."));
    assert!(!p.path(".pilot/internal/.onboarding").exists());

    let ledger = fs::read_to_string(p.path(".pilot/internal/change-ledger.log")).unwrap();
    assert!(ledger.contains(" | CREATED | CLAUDE.md"));
    assert!(!ledger.contains("project-brief.md"));

    // Nothing generated during onboarding is pending.
    let (code, _, _) = p.stop(false);
    assert_eq!(code, 0);
}

#[test]
fn finalize_without_init_fails() {
    let p = TestProject::new();
    let (code, _, stderr) = p.run(&["finalize"]);
    assert_eq!(code, 1);
    assert!(stderr.starts_with("project-pilot: "), "{stderr}");
    assert!(stderr.contains("not initialized"));
}

#[test]
fn allow_delete_writes_the_opt_out_flag() {
    let p = TestProject::initialized();
    let (code, stdout, _) = p.run(&["allow-delete"]);
    assert_eq!(code, 0);
    assert!(stdout.contains(".pp-no-guard"));
    assert!(p.path(".claude/.pp-no-guard").is_file());
}
