use std::collections::BTreeSet;
use std::net::IpAddr;

use log::debug;

/// Extract next-hop siblings from `show route` reply lines
///
/// The sibling is whatever sits between the `via` token and the following
/// `on` token, e.g. `10.1.2.0/24 via 10.0.0.5 on eth0`.
pub fn parse_siblings<S: AsRef<str>>(lines: &[S]) -> BTreeSet<IpAddr> {
    lines
        .iter()
        .filter_map(|line| next_hop(line.as_ref()))
        .collect()
}

fn next_hop(line: &str) -> Option<IpAddr> {
    let tokens: Vec<&str> = line.split_whitespace().collect();
    let via = tokens.iter().position(|t| *t == "via")?;
    let on = tokens[via + 1..].iter().position(|t| *t == "on")? + via + 1;
    let text = tokens[via + 1..on].join(" ");
    match text.parse() {
        Ok(addr) => Some(addr),
        Err(_) => {
            debug!("Ignoring unparseable next hop {:?} in {:?}", text, line);
            None
        }
    }
}
