use super::QueryTable;
use comfy_table::{presets::UTF8_FULL_CONDENSED, Cell, ContentArrangement, Table};

const NULL: &str = "NULL";

/// Render a result set as a text table
pub fn render_table(result: &QueryTable) -> String {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL_CONDENSED)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(result.columns.iter().map(Cell::new));

    for row in &result.rows {
        table.add_row(
            row.iter()
                .map(|cell| Cell::new(cell.as_deref().unwrap_or(NULL))),
        );
    }

    format!("{table}\n{} rows in set", result.rows.len())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_header_rows_and_nulls() {
        let result = QueryTable {
            query: "SELECT id, email FROM users".into(),
            columns: vec!["id".into(), "email".into()],
            rows: vec![
                vec![Some("1".into()), Some("a@example.com".into())],
                vec![Some("2".into()), None],
            ],
        };
        let out = render_table(&result);
        assert!(out.contains("email"));
        assert!(out.contains("a@example.com"));
        assert!(out.contains("NULL"));
        assert!(out.ends_with("2 rows in set"));
    }
}
