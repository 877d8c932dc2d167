fn main() {
    use build_script_cfg::Cfg;

    let cpu = Cfg::new("use_cpu");
    let cuda = Cfg::new("use_cuda");
    if cfg!(feature = "common-cpu") {
        cpu.define();
    }
    if cfg!(feature = "nvidia-gpu") && find_cuda() {
        cuda.define();
    }
}

#[cfg(feature = "nvidia-gpu")]
fn find_cuda() -> bool {
    search_cuda_tools::find_cuda_root().is_some()
}

#[cfg(not(feature = "nvidia-gpu"))]
fn find_cuda() -> bool {
    false
}
