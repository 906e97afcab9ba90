//! Reads one line from stdin and, when invoked with `--mode both`, copies it
//! to both stdout and stderr. Used by the "mixed streams" seed scenario.

use std::io::{BufRead, Write};

fn main() {
    let both = std::env::args().any(|a| a == "both");

    let stdin = std::io::stdin();
    let mut line = String::new();
    stdin.lock().read_line(&mut line).expect("read stdin");
    let line = line.trim_end_matches(['\n', '\r']);

    print!("{line}");
    std::io::stdout().flush().ok();

    if both {
        eprint!("{line}");
        std::io::stderr().flush().ok();
    }
}
