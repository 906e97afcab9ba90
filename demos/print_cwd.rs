//! Prints its current working directory to stdout. Used by the "working
//! directory" seed scenario.

fn main() {
    let cwd = std::env::current_dir().expect("current dir");
    print!("{}", cwd.display());
}
