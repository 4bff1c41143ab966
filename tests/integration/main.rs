//! End-to-end tests: requests topic → crawl worker → results topic → sink → job store

mod common;
mod job_flow;
mod redelivery;
