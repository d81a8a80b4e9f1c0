//! Terminal output utilities

use console::{style, StyledObject};
use serde::Serialize;

/// Marker printed in front of a status line
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Marker {
    Done,
    Attention,
    Note,
}

impl Marker {
    fn styled(self) -> StyledObject<&'static str> {
        match self {
            Marker::Done => style("✓").green(),
            Marker::Attention => style("!").yellow(),
            Marker::Note => style("·").cyan(),
        }
        .bold()
    }
}

fn line(marker: Marker, msg: &str) -> String {
    format!("{} {}", marker.styled(), msg)
}

pub fn success(msg: &str) {
    println!("{}", line(Marker::Done, msg));
}

/// Goes to stderr so that machine readable stdout stays clean
pub fn warning(msg: &str) {
    eprintln!("{}", line(Marker::Attention, msg));
}

pub fn info(msg: &str) {
    println!("{}", line(Marker::Note, msg));
}

pub fn header(title: &str) {
    println!("\n{}", style(title).bold().underlined());
}

/// Indented `key: value` line
pub fn kv(key: &str, value: &str) {
    println!("  {}: {}", style(key).dim(), value);
}

pub fn json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

pub fn yaml<T: Serialize>(value: &T) -> anyhow::Result<()> {
    print!("{}", serde_yaml_ng::to_string(value)?);
    Ok(())
}
