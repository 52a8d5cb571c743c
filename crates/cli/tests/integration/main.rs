mod common;

mod build_tests;
mod check_tests;
mod gc_tests;
mod lock_tests;
mod show_tests;
mod update_tests;
