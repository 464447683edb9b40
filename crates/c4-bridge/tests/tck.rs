//! 将契约测试套件编译为本 crate 的集成测试。

#[test]
fn lifecycle_contract() {
    c4_bridge_tck::run_lifecycle_suite();
}

#[test]
fn ordering_contract() {
    c4_bridge_tck::run_ordering_suite();
}

#[test]
fn attachment_contract() {
    c4_bridge_tck::run_attachment_suite();
}

#[test]
fn translation_contract() {
    c4_bridge_tck::run_translation_suite();
}

#[test]
fn every_suite_is_wired() {
    assert_eq!(
        c4_bridge_tck::suite_names(),
        ["lifecycle", "ordering", "attachment", "translation"]
    );
}
