//! Prints every environment variable it observes as `NAME=VALUE`,
//! concatenated with no separator, in an unspecified order. Used by the
//! "environment override" seed scenario, whose caller supplies a single
//! deterministic pair so ordering doesn't matter.

fn main() {
    let mut out = String::new();
    for (key, value) in std::env::vars() {
        out.push_str(&key);
        out.push('=');
        out.push_str(&value);
    }
    print!("{out}");
}
