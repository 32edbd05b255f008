//! Terminal summaries.

use comfy_table::presets::UTF8_FULL_CONDENSED;
use comfy_table::{ContentArrangement, Table};

/// Table with the house style and the given header.
pub fn table<const N: usize>(header: [&str; N]) -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL_CONDENSED)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(header);
    table
}

/// Print `title`, then a two-column `package | detail` table of `rows`.
/// Nothing is printed when `rows` is empty.
pub fn print_section<I, D>(title: &str, rows: I)
where
    I: IntoIterator<Item = (String, D)>,
    D: std::fmt::Display,
{
    let mut table = table(["Package", "Detail"]);
    let mut count = 0;
    for (name, detail) in rows {
        table.add_row([name, detail.to_string()]);
        count += 1;
    }
    if count == 0 {
        return;
    }
    println!();
    println!("{title} ({count})");
    println!("{table}");
}
