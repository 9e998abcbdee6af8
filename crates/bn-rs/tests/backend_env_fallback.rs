//! `BNRS_BACKEND` is read once per process, so this binary holds a single test that sets it
//! before anything queries the registry.

use bn_rs::backend::registry::{create_backend, default_backend, has_backend};

#[test]
fn unknown_backend_override_falls_back_to_cpu() {
    let _ = env_logger::builder().is_test(true).try_init();
    std::env::set_var("BNRS_BACKEND", "no-such-backend");
    bn_rs_backend_ref_cpu::register_cpu_backend();
    assert!(!has_backend("no-such-backend"));

    let backend = default_backend().expect("fallback backend available");
    let cpu = create_backend("cpu").expect("cpu backend registered");
    assert_eq!(backend.backend_name(), cpu.backend_name());
    assert_eq!(backend.backend_name(), "cpu-reference");

    // The cached override keeps resolving the same way.
    let again = default_backend().expect("fallback backend available");
    assert_eq!(again.backend_name(), "cpu-reference");
}
