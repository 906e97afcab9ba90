//! Writes its single argument to stdout and exits 0. Used by the "echo to
//! stdout" seed scenario.

fn main() {
    let message = std::env::args().nth(1).unwrap_or_default();
    print!("{message}");
}
