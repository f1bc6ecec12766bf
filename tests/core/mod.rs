mod http_tests;
mod scheduler_tests;
mod tcp_tests;
mod tree_tests;
