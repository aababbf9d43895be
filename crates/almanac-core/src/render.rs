use std::io::{self, IsTerminal, Write};

use unicode_width::UnicodeWidthStr;

use crate::category::CategoryRegistry;
use crate::config::Config;
use crate::datetime::{WEEKDAY_NAMES, month_name, weekday_name};
use crate::event::{Event, Priority};
use crate::filter::{FilterState, SortMode};
use crate::layout::LayoutState;
use crate::query::{QueryError, QueryOutcome, TableSchema};
use crate::view::{DayCell, DayItem, DayMarker, MonthView, Projection, WeekView, YearGridMonth, YearListMonth};

const EMPTY: &str = "No events";

#[derive(Debug, Clone)]
pub struct Renderer {
    color: bool,
}

impl Renderer {
    /// Colours only when the `color` setting allows it and stdout is a
    /// terminal.
    pub fn new(cfg: &Config) -> Self {
        Self::for_output(cfg.color_enabled(), io::stdout().is_terminal())
    }

    fn for_output(enabled: bool, terminal: bool) -> Self {
        Self {
            color: enabled && terminal,
        }
    }

    pub fn plain() -> Self {
        Self { color: false }
    }

    #[tracing::instrument(skip_all)]
    pub fn projection<W: Write>(
        &self,
        out: &mut W,
        projection: &Projection<'_>,
    ) -> anyhow::Result<()> {
        match projection {
            Projection::Month(view) => self.month(out, view),
            Projection::Week(view) => self.week(out, view),
            Projection::YearList { year, months } => self.year_list(out, *year, months),
            Projection::YearGrid { year, months } => self.year_grid(out, *year, months),
        }
    }

    fn month<W: Write>(&self, out: &mut W, view: &MonthView<'_>) -> anyhow::Result<()> {
        let title = format!("{} {}", month_name(view.month), view.year);
        writeln!(out, "{}", self.paint(&title, "1"))?;
        for row in &view.rows {
            writeln!(out)?;
            let heading = format!(
                "Week {} - {}",
                row.start.format("%Y-%m-%d"),
                row.end.format("%Y-%m-%d")
            );
            writeln!(out, "{}", self.paint(&heading, "4"))?;
            for cell in row.cells.iter().filter(|cell| cell.in_current_month) {
                self.day_cell(out, cell)?;
            }
            self.summary(out, &row.summary)?;
        }
        Ok(())
    }

    fn week<W: Write>(&self, out: &mut W, view: &WeekView<'_>) -> anyhow::Result<()> {
        let title = format!(
            "Week {} - {}",
            view.start.format("%Y-%m-%d"),
            view.end.format("%Y-%m-%d")
        );
        writeln!(out, "{}", self.paint(&title, "1"))?;
        for cell in &view.days {
            self.day_cell(out, cell)?;
        }
        self.summary(out, &view.summary)
    }

    fn day_cell<W: Write>(&self, out: &mut W, cell: &DayCell<'_>) -> anyhow::Result<()> {
        let label = format!(
            "{} {}",
            &weekday_name(cell.date)[..3],
            cell.date.format("%d")
        );
        writeln!(out, "  {}", self.paint(&label, "1"))?;
        if cell.items.is_empty() {
            writeln!(out, "      {}", self.paint(EMPTY, "2"))?;
        }
        for item in &cell.items {
            writeln!(out, "      {}", self.item_line(item))?;
        }
        Ok(())
    }

    fn summary<W: Write>(&self, out: &mut W, items: &[DayItem<'_>]) -> anyhow::Result<()> {
        writeln!(out, "  {} ({})", self.paint("Tasks", "1"), items.len())?;
        if items.is_empty() {
            writeln!(out, "      {}", self.paint(EMPTY, "2"))?;
        }
        for item in items {
            writeln!(
                out,
                "      {} {}",
                item.event.date.format("%m-%d"),
                self.item_line(item)
            )?;
        }
        Ok(())
    }

    fn year_list<W: Write>(
        &self,
        out: &mut W,
        year: i32,
        months: &[YearListMonth<'_>],
    ) -> anyhow::Result<()> {
        writeln!(out, "{}", self.paint(&year.to_string(), "1"))?;
        for month in months {
            writeln!(out)?;
            writeln!(out, "{}", self.paint(month.name, "4"))?;
            if month.items.is_empty() {
                writeln!(out, "  {}", self.paint(EMPTY, "2"))?;
            }
            for item in &month.items {
                writeln!(out, "  {:>2}  {}", item.day, self.item_line(item))?;
            }
        }
        Ok(())
    }

    fn year_grid<W: Write>(
        &self,
        out: &mut W,
        year: i32,
        months: &[YearGridMonth],
    ) -> anyhow::Result<()> {
        writeln!(out, "{}", self.paint(&year.to_string(), "1"))?;
        let header = WEEKDAY_NAMES
            .iter()
            .map(|name| format!("{} ", &name[..2]))
            .collect::<String>();
        for month in months {
            writeln!(out)?;
            writeln!(out, "{}", self.paint(month.name, "4"))?;
            writeln!(out, "{}", header.trim_end())?;

            let mut line = "   ".repeat(month.leading_blanks as usize);
            let mut column = month.leading_blanks;
            for day in &month.days {
                line.push_str(&self.mini_day(day.day, &day.marker));
                column += 1;
                if column == 7 {
                    writeln!(out, "{}", line.trim_end())?;
                    line.clear();
                    column = 0;
                }
            }
            if !line.is_empty() {
                writeln!(out, "{}", line.trim_end())?;
            }
            if month.days.iter().all(|day| day.marker == DayMarker::None) {
                writeln!(out, "{}", self.paint(EMPTY, "2"))?;
            }
        }
        writeln!(out)?;
        writeln!(out, "! high priority   * mixed high priority   . other events")?;
        Ok(())
    }

    fn mini_day(&self, day: u32, marker: &DayMarker) -> String {
        let number = format!("{day:>2}");
        match marker {
            DayMarker::None => format!("{number} "),
            DayMarker::Solid(color) => format!("{}!", self.paint_hex(&number, color)),
            DayMarker::Blend(colors) => {
                let first = colors.first().map(String::as_str).unwrap_or_default();
                format!("{}*", self.paint_hex(&number, first))
            }
            DayMarker::Light => format!("{}.", self.paint(&number, "4")),
        }
    }

    fn item_line(&self, item: &DayItem<'_>) -> String {
        let swatch = self.paint_hex("■", item.color);
        let mut line = format!(
            "{swatch} {} {}",
            self.priority_tag(item.event.priority),
            item.event.name
        );
        if !item.event.description.is_empty() {
            line.push_str(&self.paint(&format!(" - {}", item.event.description), "2"));
        }
        line.push_str(&self.paint(&format!("  [{}]", item.event.id), "2"));
        line
    }

    fn priority_tag(&self, priority: Priority) -> String {
        match priority {
            Priority::High => self.paint("[H]", "31"),
            Priority::Medium => self.paint("[M]", "33"),
            Priority::Low => "[L]".to_string(),
        }
    }

    #[tracing::instrument(skip_all, fields(count = events.len()))]
    pub fn event_table<W: Write>(
        &self,
        out: &mut W,
        events: &[&Event],
        categories: &CategoryRegistry,
    ) -> anyhow::Result<()> {
        if events.is_empty() {
            writeln!(out, "{EMPTY}")?;
            return Ok(());
        }
        let headers = ["ID", "Date", "Day", "Pri", "Category", "Name", "Description"]
            .map(String::from)
            .to_vec();
        let rows = events
            .iter()
            .map(|event| {
                let category = categories.resolve(&event.category_id);
                vec![
                    self.paint(event.id.as_str(), "33"),
                    event.date.format("%Y-%m-%d").to_string(),
                    weekday_name(event.date)[..3].to_string(),
                    self.priority_tag(event.priority),
                    self.paint_hex(category.name, category.color),
                    event.name.clone(),
                    event.description.clone(),
                ]
            })
            .collect();
        write_table(out, headers, rows)
    }

    pub fn event_info<W: Write>(
        &self,
        out: &mut W,
        event: &Event,
        categories: &CategoryRegistry,
    ) -> anyhow::Result<()> {
        let category = categories.resolve(&event.category_id);
        writeln!(out, "id          {}", event.id)?;
        writeln!(out, "name        {}", event.name)?;
        writeln!(
            out,
            "date        {} ({})",
            event.date.format("%Y-%m-%d"),
            weekday_name(event.date)
        )?;
        writeln!(out, "priority    {}", event.priority)?;
        writeln!(
            out,
            "category    {} ({})",
            self.paint_hex(category.name, category.color),
            event.category_id
        )?;
        writeln!(out, "description {}", event.description)?;
        Ok(())
    }

    pub fn categories<W: Write>(
        &self,
        out: &mut W,
        categories: &CategoryRegistry,
        filters: &FilterState,
        events: &[Event],
    ) -> anyhow::Result<()> {
        let headers = ["ID", "Name", "Color", "Active", "Events"]
            .map(String::from)
            .to_vec();
        let rows = categories
            .iter()
            .map(|cat| {
                let count = events
                    .iter()
                    .filter(|event| event.category_id == cat.id)
                    .count();
                vec![
                    self.paint(cat.id.as_str(), "33"),
                    self.paint_hex(&cat.name, &cat.color),
                    cat.color.clone(),
                    yes_no(filters.active_categories.contains(&cat.id)).to_string(),
                    count.to_string(),
                ]
            })
            .collect();
        write_table(out, headers, rows)
    }

    pub fn filters<W: Write>(
        &self,
        out: &mut W,
        categories: &CategoryRegistry,
        filters: &FilterState,
        sort_by: SortMode,
        panel_open: bool,
    ) -> anyhow::Result<()> {
        writeln!(out, "Categories")?;
        for cat in categories.iter() {
            let mark = if filters.active_categories.contains(&cat.id) { "[x]" } else { "[ ]" };
            writeln!(out, "  {mark} {} ({})", self.paint_hex(&cat.name, &cat.color), cat.id)?;
        }
        writeln!(out, "Priorities")?;
        for priority in Priority::ALL {
            let mark = if filters.active_priorities.contains(&priority) { "[x]" } else { "[ ]" };
            writeln!(out, "  {mark} {priority}")?;
        }
        writeln!(out, "Sort        {sort_by}")?;
        writeln!(out, "Panel       {}", if panel_open { "open" } else { "closed" })?;
        Ok(())
    }

    #[tracing::instrument(skip_all)]
    pub fn query_result<W: Write>(
        &self,
        out: &mut W,
        query: &str,
        result: &Result<QueryOutcome, QueryError>,
    ) -> anyhow::Result<()> {
        writeln!(out, "{}", self.paint(query, "2"))?;
        match result {
            Ok(QueryOutcome::Empty) => writeln!(out, "No results")?,
            Ok(QueryOutcome::Rows { columns, rows }) => {
                let rows = rows
                    .iter()
                    .map(|row| row.iter().map(cell_text).collect())
                    .collect();
                write_table(&mut *out, columns.clone(), rows)?;
                writeln!(out, "({} rows)", result.as_ref().map(QueryOutcome::row_count).unwrap_or(0))?;
            }
            Err(err) => {
                write_table(
                    &mut *out,
                    vec!["Error".to_string()],
                    vec![vec![self.paint(&err.to_string(), "31")]],
                )?;
            }
        }
        Ok(())
    }

    pub fn history<W: Write>(&self, out: &mut W, entries: &[String]) -> anyhow::Result<()> {
        if entries.is_empty() {
            writeln!(out, "No queries yet")?;
        }
        for (idx, query) in entries.iter().enumerate() {
            writeln!(out, "{:>3}  {query}", idx + 1)?;
        }
        Ok(())
    }

    pub fn schema<W: Write>(&self, out: &mut W, tables: &[TableSchema]) -> anyhow::Result<()> {
        for table in tables {
            writeln!(out, "{}", self.paint(table.name, "1"))?;
            for (name, ty) in table.columns {
                writeln!(out, "  {name:<16} {ty}")?;
            }
        }
        Ok(())
    }

    pub fn layout<W: Write>(
        &self,
        out: &mut W,
        layout: &LayoutState,
        month: Option<&MonthView<'_>>,
    ) -> anyhow::Result<()> {
        let headers = ["Track", "Size"].map(String::from).to_vec();
        let mut rows: Vec<Vec<String>> = WEEKDAY_NAMES
            .iter()
            .zip(&layout.col_widths)
            .enumerate()
            .map(|(idx, (name, width))| vec![format!("col {idx} ({})", &name[..3]), width.clone()])
            .collect();
        rows.push(vec!["stats".to_string(), layout.stats_width.clone()]);
        if let Some(month) = month {
            for key in month.row_keys() {
                rows.push(vec![key.to_string(), layout.row_height(key).to_string()]);
            }
        }
        write_table(&mut *out, headers, rows)?;
        writeln!(out)?;
        writeln!(out, "columns  {}", layout.column_template())?;
        if let Some(month) = month {
            writeln!(out, "rows     {}", layout.row_template(&month.row_keys()))?;
        }
        Ok(())
    }

    pub fn paint(&self, text: &str, code: &str) -> String {
        if !self.color {
            return text.to_string();
        }
        format!("\x1b[{code}m{text}\x1b[0m")
    }

    /// Paints with a `#rrggbb` colour; other tokens leave the text plain.
    fn paint_hex(&self, text: &str, color: &str) -> String {
        match parse_hex(color) {
            Some((r, g, b)) => self.paint(text, &format!("38;2;{r};{g};{b}")),
            None => text.to_string(),
        }
    }
}

fn yes_no(flag: bool) -> &'static str {
    if flag { "yes" } else { "no" }
}

fn parse_hex(color: &str) -> Option<(u8, u8, u8)> {
    let hex = color.trim().strip_prefix('#')?;
    if hex.len() != 6 || !hex.is_ascii() {
        return None;
    }
    let channel = |range: std::ops::Range<usize>| u8::from_str_radix(&hex[range], 16).ok();
    Some((channel(0..2)?, channel(2..4)?, channel(4..6)?))
}

fn cell_text(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::Null => String::new(),
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn write_table<W: Write>(
    mut writer: W,
    headers: Vec<String>,
    rows: Vec<Vec<String>>,
) -> anyhow::Result<()> {
    let column_count = headers.len();
    let mut widths = vec![0usize; column_count];

    for (idx, header) in headers.iter().enumerate() {
        widths[idx] = widths[idx].max(UnicodeWidthStr::width(header.as_str()));
    }

    for row in &rows {
        for (idx, cell) in row.iter().enumerate().take(column_count) {
            widths[idx] = widths[idx].max(UnicodeWidthStr::width(strip_ansi(cell).as_str()));
        }
    }

    for idx in 0..column_count {
        write!(writer, "{:width$} ", headers[idx], width = widths[idx])?;
    }
    writeln!(writer)?;

    for width in &widths {
        write!(writer, "{:-<width$} ", "", width = *width)?;
    }
    writeln!(writer)?;

    for row in rows {
        for (idx, width) in widths.iter().enumerate() {
            let cell = row.get(idx).map(String::as_str).unwrap_or_default();
            let visible_width = UnicodeWidthStr::width(strip_ansi(cell).as_str());
            let padding = width.saturating_sub(visible_width);
            write!(writer, "{}{} ", cell, " ".repeat(padding))?;
        }
        writeln!(writer)?;
    }

    Ok(())
}

fn strip_ansi(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut escaped = false;

    for ch in s.chars() {
        if escaped {
            if ch == 'm' {
                escaped = false;
            }
            continue;
        }

        if ch == '\x1b' {
            escaped = true;
            continue;
        }

        out.push(ch);
    }

    out
}
