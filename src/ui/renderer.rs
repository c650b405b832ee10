// Text and JSON formatting of a snapshot
// The live dashboard in layout.rs reuses `summary_rows` so both views agree

use {
    crate::aggregate::GuildSnapshot,
    std::io::{self, Write},
};

/// Label/value pairs in display order
pub fn summary_rows(snapshot: &GuildSnapshot) -> Vec<(&'static str, u64)> {
    vec![
        ("Guilds", snapshot.guilds),
        ("Unavailable Guilds", snapshot.unavailable_guilds),
        ("Ready Shards", snapshot.ready_shards),
        ("Recommended Shards", snapshot.expected_shards),
        ("Member Count", snapshot.member_count),
        ("> 100,000", snapshot.gt_100k),
        ("> 10,000", snapshot.gt_10k),
        ("> 1,000", snapshot.gt_1k),
        ("Partnered", snapshot.partner_count),
        ("Verified", snapshot.verified_count),
        ("P & V", snapshot.verified_partner_count),
        ("Largest", snapshot.largest_guild_size),
        ("Avg Guild Size", snapshot.average_member_count),
    ]
}

/// Aligned `Label => value` list
pub fn write_summary<W: Write>(w: &mut W, snapshot: &GuildSnapshot) -> io::Result<()> {
    let rows = summary_rows(snapshot);
    let width = rows.iter().map(|(label, _)| label.len()).max().unwrap_or(0);

    for (label, value) in rows {
        writeln!(w, "{:<width$} => {}", label, value, width = width)?;
    }
    Ok(())
}

pub fn to_json(snapshot: &GuildSnapshot) -> serde_json::Result<String> {
    serde_json::to_string(snapshot)
}

/// Format a count with thousands separators
pub fn format_count(n: u64) -> String {
    let digits = n.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(c);
    }
    out
}
