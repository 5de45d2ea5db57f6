mod domain_tests;
mod gateway_tests;
mod publisher_tests;
