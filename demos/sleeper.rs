//! Sleeps for 25 seconds unless terminated first. Used by the "terminate an
//! infinite sleeper" and "forced kill" seed scenarios — long enough that
//! the test suite's terminate/kill calls are what end it, not the timer.

fn main() {
    std::thread::sleep(std::time::Duration::from_secs(25));
}
