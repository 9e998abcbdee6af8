use bn_rs::backend::registry::{
    create_backend, default_backend, has_backend, list_backends, register_backend,
};
use bn_rs_backend_ref_cpu::CpuReferenceBackend;

#[test]
fn test_backend_registry() {
    // Ensure backends are registered (auto-registration via .init_array)
    bn_rs_backend_ref_cpu::register_cpu_backend();

    let backends = list_backends();
    println!("Available backends: {:?}", backends);

    // CPU backend should always be available
    assert!(has_backend("cpu"), "cpu backend not registered");
    assert!(backends.contains(&"cpu".to_string()));
    assert!(backends.contains(&"cpu-reference".to_string()));

    // Registered as "cpu" but reports its own name
    let cpu_backend = create_backend("cpu").expect("failed to create cpu backend");
    assert_eq!(cpu_backend.backend_name(), "cpu-reference");

    assert!(!has_backend("nonexistent"));
    assert!(create_backend("nonexistent").is_none());
}

#[test]
fn listed_backends_are_sorted() {
    bn_rs_backend_ref_cpu::register_cpu_backend();
    register_backend("aaa-alias", CpuReferenceBackend::new);
    let backends = list_backends();
    let mut sorted = backends.clone();
    sorted.sort();
    assert_eq!(backends, sorted);
    assert_eq!(backends.first().map(String::as_str), Some("aaa-alias"));
}

#[test]
fn default_backend_resolves_to_cpu() {
    bn_rs_backend_ref_cpu::register_cpu_backend();
    // Without BNRS_BACKEND the "cpu" backend is the default.
    let backend = default_backend().expect("default backend available");
    assert_eq!(backend.backend_name(), "cpu-reference");
    assert!(backend.minimum_epsilon() > 0.0);
}
