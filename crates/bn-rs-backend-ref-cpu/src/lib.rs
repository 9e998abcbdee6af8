pub mod cpu;

pub use cpu::{
    statistics_dtype, CpuKernel, CpuKernelInterceptor, CpuReferenceBackend, GenericCpuBackend,
    NoopInterceptor, MIN_EPSILON,
};

/// Register the CPU backend with the global backend registry.
///
/// This function is called automatically via a static initializer, but can also
/// be called manually to ensure the backend is registered.
/// The backend is registered under both "cpu" and "cpu-reference" names.
pub fn register_cpu_backend() {
    let constructor = CpuReferenceBackend::new;

    bn_rs::backend::registry::register_backend("cpu", constructor);
    bn_rs::backend::registry::register_backend("cpu-reference", constructor);
}

// Auto-register on library load
#[cfg(not(target_family = "wasm"))]
#[used]
#[link_section = ".init_array"]
static REGISTER_CPU_BACKEND: extern "C" fn() = {
    extern "C" fn register() {
        register_cpu_backend();
    }
    register
};
