fn main() {
    std::process::exit(vnet::core::main::main_run_vnet(std::env::args_os()));
}
