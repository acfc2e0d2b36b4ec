// Integration tests for the public client API.

mod broker_client_test;
mod connection_test;
