#[test]
fn domain_event_expansions_compile_and_run() {
    let t = trybuild::TestCases::new();
    t.pass("tests/ui/event_basic.rs");
    t.pass("tests/ui/event_default.rs");
    t.pass("tests/ui/event_all_variants.rs");
}
