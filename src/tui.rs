//! Terminal output helpers honoring greppable and accessible modes.
//!
//! Greppable mode silences everything except machine-readable result lines;
//! accessible mode drops the decorations that trip up screen readers.

/// Prints a status line unless greppable mode is on.
#[macro_export]
macro_rules! output {
    ($name:expr, $greppable:expr, $accessible:expr) => {{
        use colored::Colorize;
        if !$greppable {
            if $accessible {
                println!("{}", $name);
            } else {
                println!("{} {}", "[~]".green(), $name);
            }
        }
    }};
}

/// Prints a warning unless greppable mode is on.
#[macro_export]
macro_rules! warning {
    ($name:expr, $greppable:expr, $accessible:expr) => {{
        use colored::Colorize;
        if !$greppable {
            if $accessible {
                eprintln!("{}", $name);
            } else {
                eprintln!("{} {}", "[!]".red(), $name);
            }
        }
    }};
}

/// Prints supplementary detail unless greppable mode is on.
#[macro_export]
macro_rules! detail {
    ($name:expr, $greppable:expr, $accessible:expr) => {{
        use colored::Colorize;
        if !$greppable {
            if $accessible {
                println!("{}", $name);
            } else {
                println!("{} {}", "[>]".blue(), $name);
            }
        }
    }};
}
