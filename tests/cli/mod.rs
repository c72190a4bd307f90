//! CLI module tests.

mod events_test;
