//! # cocaine-test
//!
//! [RuntimeMock](mock::RuntimeMock) stands in for the cloud: a locator and scripted services
//! on ephemeral local ports. The scenario tests live in `tests`.

pub mod mock;


extern crate captains_log;
extern crate log;
pub use captains_log::logfn;

use captains_log::*;
use rstest::*;
use std::fmt;
use tokio::runtime::Runtime;

#[fixture]
pub fn runner() -> TestRunner {
    TestRunner::new()
}

impl fmt::Debug for TestRunner {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "")
    }
}

pub struct TestRunner {
    rt: Runtime,
}

impl TestRunner {
    pub fn new() -> Self {
        recipe::raw_file_logger("/tmp/cocaine_test.log", Level::Trace)
            .test()
            .build()
            .expect("log");
        Self {
            rt: tokio::runtime::Builder::new_multi_thread()
                .worker_threads(4)
                .enable_all()
                .build()
                .expect("runtime"),
        }
    }

    pub fn block_on<F: Future<Output = ()> + Send + 'static>(&self, f: F) {
        self.rt.block_on(f);
    }
}
