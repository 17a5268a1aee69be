//! Table output and text helpers

use clap::ValueEnum;

/// Output format
#[derive(Clone, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Columnar table (default)
    #[default]
    Table,
    /// JSON
    Json,
}

/// Placeholder for an empty cell
pub const NONE: &str = "-";

/// Render rows as a column-aligned table with headers.
pub fn render_table(headers: &[&str], rows: &[Vec<String>]) -> String {
    let num_cols = headers.len();
    let mut widths: Vec<usize> = headers.iter().map(|h| h.len()).collect();
    for row in rows {
        for (i, cell) in row.iter().enumerate().take(num_cols) {
            widths[i] = widths[i].max(cell.len());
        }
    }

    let line = |cells: Vec<&str>| -> String {
        let padded: Vec<String> = cells
            .iter()
            .enumerate()
            .map(|(i, cell)| {
                let w = widths.get(i).copied().unwrap_or(0);
                format!("{:<width$}", cell, width = w)
            })
            .collect();
        padded.join("  ").trim_end().to_string()
    };

    let mut out = line(headers.to_vec());
    out.push('\n');
    for row in rows {
        out.push_str(&line(row.iter().map(String::as_str).collect()));
        out.push('\n');
    }
    out
}

/// Print rows as a column-aligned table with headers.
pub fn print_table(headers: &[&str], rows: &[Vec<String>]) {
    print!("{}", render_table(headers, rows));
}

/// Strip the blank padding the controller helper puts around its report
pub fn trim_report(output: &str) -> &str {
    output.trim_matches([' ', '\n']).trim_end_matches([' ', '\n', '\t'])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn columns_are_aligned_to_widest_cell() {
        let rows = vec![
            vec!["web".to_string(), "frontend".to_string()],
            vec!["payments".to_string(), "api".to_string()],
        ];
        let table = render_table(&["NAMESPACE", "SERVICE"], &rows);
        assert_eq!(
            table,
            "NAMESPACE  SERVICE\nweb        frontend\npayments   api\n"
        );
    }

    #[test]
    fn headers_only_when_no_rows() {
        assert_eq!(render_table(&["A", "B"], &[]), "A  B\n");
    }

    #[test]
    fn report_padding_is_trimmed() {
        assert_eq!(trim_report("\n  status: UP \n\t\n"), "status: UP");
        assert_eq!(trim_report("a\tb"), "a\tb");
    }
}
