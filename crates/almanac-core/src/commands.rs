mod modifiers;

use std::io::{self, BufRead, Write};
use std::path::Path;

use anyhow::{Context, anyhow, bail};
use chrono::{NaiveDate, Weekday};
use tracing::{debug, info, instrument, warn};

use crate::app::{Calendar, Disposition};
use crate::cli::Invocation;
use crate::config::Config;
use crate::datastore::DataStore;
use crate::datetime::{self, parse_date_arg, start_of_week};
use crate::event::{EventDraft, Id, NEUTRAL_COLOR, Priority};
use crate::filter::SortMode;
use crate::holidays::{NagerClient, import_holidays};
use crate::layout::{ResizeTarget, Resizer, RowKey, parse_px};
use crate::query::{QueryRun, SCHEMA, SqliteEngine, run_console_query};
use crate::render::Renderer;
use crate::view::{Projection, ViewKind, ViewRequest, YearMode, project};

use self::modifiers::{apply_mods, parse_name_and_mods, resolve_category};

pub fn known_command_names() -> Vec<&'static str> {
    vec![
        "add",
        "modify",
        "move",
        "delete",
        "list",
        "info",
        "month",
        "week",
        "year",
        "next",
        "prev",
        "today",
        "categories",
        "category",
        "filter",
        "sort",
        "query",
        "history",
        "schema",
        "export",
        "import",
        "holidays",
        "layout",
        "help",
        "version",
    ]
}

pub fn expand_command_abbrev<'a>(token: &'a str, known: &[&'a str]) -> Option<&'a str> {
    if known.contains(&token) {
        return Some(token);
    }

    let mut matches = known.iter().copied().filter(|name| name.starts_with(token));
    let first = matches.next()?;
    if matches.next().is_some() {
        None
    } else {
        Some(first)
    }
}

/// Shared state for one command run.
struct Session<'a> {
    store: &'a DataStore,
    cfg: &'a Config,
    renderer: &'a Renderer,
    calendar: Calendar,
    today: NaiveDate,
}

impl Session<'_> {
    fn save(&self) -> anyhow::Result<()> {
        self.store.save(&self.calendar)
    }

    fn history_limit(&self) -> usize {
        self.cfg.history_limit()
    }
}

#[instrument(skip(store, cfg, renderer, inv))]
pub fn dispatch(
    store: &DataStore,
    cfg: &Config,
    renderer: &Renderer,
    inv: Invocation,
) -> anyhow::Result<()> {
    let today = datetime::today();
    let calendar = store.load_calendar(today, cfg.history_limit());
    let mut session = Session {
        store,
        cfg,
        renderer,
        calendar,
        today,
    };
    let command = inv.command.as_str();
    let args = inv.command_args.as_slice();

    debug!(command, args = ?args, "dispatching command");

    match command {
        "add" => cmd_add(&mut session, args),
        "modify" => cmd_modify(&mut session, args),
        "move" => cmd_move(&mut session, args),
        "delete" => cmd_delete(&mut session, args),
        "list" => cmd_list(&session),
        "info" => cmd_info(&session, args),
        "month" => cmd_view(&mut session, ViewKind::Month, args),
        "week" => cmd_view(&mut session, ViewKind::Week, args),
        "year" => cmd_view(&mut session, ViewKind::Year, args),
        "next" => cmd_shift(&mut session, 1),
        "prev" => cmd_shift(&mut session, -1),
        "today" => {
            session.calendar.settings.reference = session.today;
            session.save()?;
            show_current(&session)
        }
        "categories" => cmd_categories(&session),
        "category" => cmd_category(&mut session, args),
        "filter" => cmd_filter(&mut session, args),
        "sort" => cmd_sort(&mut session, args),
        "query" => cmd_query(&mut session, args),
        "history" => {
            let mut out = io::stdout().lock();
            renderer.history(&mut out, session.calendar.history.entries())
        }
        "schema" => {
            let mut out = io::stdout().lock();
            renderer.schema(&mut out, &SCHEMA)
        }
        "export" => cmd_export(&session, args),
        "import" => cmd_import(&mut session, args),
        "holidays" => cmd_holidays(&mut session),
        "layout" => cmd_layout(&mut session, args),
        "help" => cmd_help(),
        "version" => {
            println!("{}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
        other => Err(anyhow!("unknown command: {other}")),
    }
}

fn required<'a>(args: &'a [String], idx: usize, what: &str) -> anyhow::Result<&'a str> {
    args.get(idx)
        .map(String::as_str)
        .ok_or_else(|| anyhow!("missing argument: {what}"))
}

#[instrument(skip(session, args))]
fn cmd_add(session: &mut Session<'_>, args: &[String]) -> anyhow::Result<()> {
    info!("command add");

    let (name, mods) = parse_name_and_mods(args, session.today)?;
    let mut draft = EventDraft::new(name, session.today);
    apply_mods(&mut draft, &mods, &session.calendar.categories)?;
    if draft.name.trim().is_empty() {
        bail!("add: event name is required");
    }

    let id = session.calendar.add_event(draft).id.clone();
    session.save()?;
    println!("Created event {id}.");
    Ok(())
}

#[instrument(skip(session, args))]
fn cmd_modify(session: &mut Session<'_>, args: &[String]) -> anyhow::Result<()> {
    info!("command modify");

    let id = Id::from(required(args, 0, "event id")?);
    let current = session
        .calendar
        .events
        .get(&id)
        .ok_or_else(|| anyhow!("event not found: {id}"))?;

    let (words, mut mods) = parse_name_and_mods(&args[1..], session.today)?;
    if !words.is_empty() {
        mods.insert(0, modifiers::Mod::Name(words));
    }
    if mods.is_empty() {
        bail!("modify: nothing to change");
    }

    let mut draft = current.to_draft();
    apply_mods(&mut draft, &mods, &session.calendar.categories)?;
    session.calendar.events.update(&id, draft)?;
    session.save()?;
    println!("Modified event {id}.");
    Ok(())
}

#[instrument(skip(session, args))]
fn cmd_move(session: &mut Session<'_>, args: &[String]) -> anyhow::Result<()> {
    info!("command move");

    let id = Id::from(required(args, 0, "event id")?);
    let date = parse_date_arg(required(args, 1, "date")?, session.today)?;
    session.calendar.events.move_to(&id, date)?;
    session.save()?;
    println!("Moved event {id} to {}.", date.format("%Y-%m-%d"));
    Ok(())
}

#[instrument(skip(session, args))]
fn cmd_delete(session: &mut Session<'_>, args: &[String]) -> anyhow::Result<()> {
    info!("command delete");

    let id = Id::from(required(args, 0, "event id")?);
    let removed = session.calendar.events.delete(&id)?;
    session.save()?;
    println!("Deleted event {id} ({}).", removed.name);
    Ok(())
}

fn cmd_list(session: &Session<'_>) -> anyhow::Result<()> {
    let visible = session.calendar.visible_events();
    let mut out = io::stdout().lock();
    session
        .renderer
        .event_table(&mut out, &visible, &session.calendar.categories)
}

fn cmd_info(session: &Session<'_>, args: &[String]) -> anyhow::Result<()> {
    let id = Id::from(required(args, 0, "event id")?);
    let event = session
        .calendar
        .events
        .get(&id)
        .ok_or_else(|| anyhow!("event not found: {id}"))?;
    let mut out = io::stdout().lock();
    session
        .renderer
        .event_info(&mut out, event, &session.calendar.categories)
}

#[instrument(skip(session, args))]
fn cmd_view(session: &mut Session<'_>, view: ViewKind, args: &[String]) -> anyhow::Result<()> {
    let settings = &mut session.calendar.settings;
    settings.view = view;
    for arg in args {
        if view == ViewKind::Year
            && let Some(mode) = YearMode::from_key(arg)
        {
            settings.year_mode = mode;
            continue;
        }
        settings.reference = parse_date_arg(arg, session.today)?;
    }
    session.save()?;
    show_current(session)
}

fn cmd_shift(session: &mut Session<'_>, step: i32) -> anyhow::Result<()> {
    let reference = session.calendar.shift(step);
    debug!(%reference, step, "shifted reference date");
    session.save()?;
    show_current(session)
}

fn show_current(session: &Session<'_>) -> anyhow::Result<()> {
    let projection = session.calendar.project();
    let mut out = io::stdout().lock();
    session.renderer.projection(&mut out, &projection)
}

fn cmd_categories(session: &Session<'_>) -> anyhow::Result<()> {
    let calendar = &session.calendar;
    let mut out = io::stdout().lock();
    session.renderer.categories(
        &mut out,
        &calendar.categories,
        &calendar.filters,
        calendar.events.as_slice(),
    )
}

#[instrument(skip(session, args))]
fn cmd_category(session: &mut Session<'_>, args: &[String]) -> anyhow::Result<()> {
    let action = required(args, 0, "category action (add, edit, delete)")?;
    let rest = &args[1..];
    match action {
        "add" => {
            let (name, color) = match rest {
                [] => bail!("category add: name is required"),
                [name] => (name.clone(), NEUTRAL_COLOR.to_string()),
                [name @ .., color] => (name.join(" "), color.clone()),
            };
            let id = session.calendar.add_category(&name, &color)?;
            session.save()?;
            println!("Created category {id} ({name}).");
        }
        "edit" => {
            let id = Id::from(required(rest, 0, "category id")?);
            let mut name = None;
            let mut color = None;
            for arg in &rest[1..] {
                match arg.split_once(':') {
                    Some(("name", value)) => name = Some(value),
                    Some(("color", value)) => color = Some(value),
                    _ => warn!(arg = %arg, "unrecognized category field ignored"),
                }
            }
            let edited = session.calendar.edit_category(&id, name, color)?;
            let summary = format!("{} {}", edited.name, edited.color);
            session.save()?;
            println!("Updated category {id}: {summary}.");
        }
        "delete" => {
            let id = resolve_category(&session.calendar.categories, required(rest, 0, "category id")?)?;
            session.calendar.prompt_category_delete(&id)?;

            let disposition = match rest.get(1) {
                Some(raw) => Some(raw.parse::<Disposition>()?),
                None => ask_disposition(session, &id)?,
            };
            let Some(disposition) = disposition else {
                session.calendar.cancel_category_delete();
                println!("Cancelled.");
                return Ok(());
            };

            if let Some(outcome) = session.calendar.confirm_category_delete(disposition)? {
                session.save()?;
                println!(
                    "Deleted category {} ({}); {} events moved, {} deleted.",
                    outcome.category.id,
                    outcome.category.name,
                    outcome.events_moved,
                    outcome.events_deleted
                );
            }
        }
        other => bail!("unknown category action: {other}"),
    }
    Ok(())
}

/// Interactive second step of a category delete. `None` cancels.
fn ask_disposition(session: &Session<'_>, id: &Id) -> anyhow::Result<Option<Disposition>> {
    let count = session
        .calendar
        .events
        .iter()
        .filter(|event| &event.category_id == id)
        .count();
    let name = session.calendar.categories.resolve(id).name;

    let mut out = io::stdout().lock();
    write!(
        out,
        "Category '{name}' has {count} events. Move them to General or delete them? [move/delete/cancel] "
    )?;
    out.flush()?;
    drop(out);

    let mut line = String::new();
    io::stdin()
        .lock()
        .read_line(&mut line)
        .context("failed reading confirmation")?;
    match line.trim() {
        "" | "c" | "cancel" => Ok(None),
        answer => answer.parse().map(Some),
    }
}

#[instrument(skip(session, args))]
fn cmd_filter(session: &mut Session<'_>, args: &[String]) -> anyhow::Result<()> {
    let calendar = &mut session.calendar;
    match args.first().map(String::as_str) {
        None => {}
        Some("cat") | Some("category") => {
            let id = resolve_category(&calendar.categories, required(args, 1, "category id")?)?;
            let active = calendar.filters.toggle_category(&id);
            println!("Category {id} {}.", if active { "shown" } else { "hidden" });
        }
        Some("all") => calendar.filters.toggle_all_categories(&calendar.categories),
        Some("pri") | Some("priority") => {
            let priority: Priority = required(args, 1, "priority")?.parse()?;
            let active = calendar.filters.toggle_priority(priority);
            println!("Priority {priority} {}.", if active { "shown" } else { "hidden" });
        }
        Some("panel") => {
            calendar.settings.filter_panel_open = !calendar.settings.filter_panel_open;
        }
        Some(other) => bail!("unknown filter action: {other} (cat, all, pri, panel)"),
    }
    if !args.is_empty() {
        session.save()?;
    }

    let calendar = &session.calendar;
    let mut out = io::stdout().lock();
    session.renderer.filters(
        &mut out,
        &calendar.categories,
        &calendar.filters,
        calendar.settings.sort_by,
        calendar.settings.filter_panel_open,
    )
}

fn cmd_sort(session: &mut Session<'_>, args: &[String]) -> anyhow::Result<()> {
    let Some(raw) = args.first() else {
        println!("Current sort: {}", session.calendar.settings.sort_by);
        let modes = SortMode::ALL.map(SortMode::as_key).join(", ");
        println!("Available: {modes}");
        return Ok(());
    };
    let mode: SortMode = raw.parse()?;
    session.calendar.settings.sort_by = mode;
    session.save()?;
    println!("Sorting by {mode}.");
    Ok(())
}

/// Query failures are printed inline and never fail the command.
#[instrument(skip(session, args))]
fn cmd_query(session: &mut Session<'_>, args: &[String]) -> anyhow::Result<()> {
    let raw = args.join(" ");
    let tables = session.calendar.query_tables(session.today);
    let limit = session.history_limit();

    let before = session.calendar.history.clone();
    let run = match SqliteEngine::open_in_memory() {
        Ok(mut engine) => run_console_query(
            &mut engine,
            &mut session.calendar.history,
            limit,
            &raw,
            &tables,
        ),
        Err(err) => QueryRun {
            query: raw,
            result: Err(err),
        },
    };
    if session.calendar.history != before {
        session.save()?;
    }

    let mut out = io::stdout().lock();
    session.renderer.query_result(&mut out, &run.query, &run.result)
}

fn cmd_export(session: &Session<'_>, args: &[String]) -> anyhow::Result<()> {
    let path = args.first().map(Path::new);
    let written = session.store.export(&session.calendar, path)?;
    println!("Exported to {}.", written.display());
    Ok(())
}

#[instrument(skip(session, args))]
fn cmd_import(session: &mut Session<'_>, args: &[String]) -> anyhow::Result<()> {
    let path = Path::new(required(args, 0, "file path")?);
    let doc = session.store.import(path)?;
    let limit = session.history_limit();
    doc.apply(&mut session.calendar, limit);
    session.save()?;
    println!(
        "Imported {} events and {} categories from {}.",
        session.calendar.events.len(),
        session.calendar.categories.len(),
        path.display()
    );
    Ok(())
}

#[instrument(skip(session))]
fn cmd_holidays(session: &mut Session<'_>) -> anyhow::Result<()> {
    let settings = session.cfg.holiday_settings()?;
    let client = NagerClient::new(&settings.endpoint)?;
    println!("Fetching holidays...");
    let report = import_holidays(&mut session.calendar, &client, &settings);
    if report.changed() {
        session.save()?;
    }

    if report.offline {
        println!("Offline mode: no holiday year could be fetched.");
        return Ok(());
    }
    println!(
        "Added {} holidays ({} already present) to category {}.",
        report.added, report.skipped, report.category_id
    );
    if !report.failed_years.is_empty() {
        let years = report
            .failed_years
            .iter()
            .map(i32::to_string)
            .collect::<Vec<_>>()
            .join(", ");
        println!("Skipped years: {years}");
    }
    Ok(())
}

#[instrument(skip(session, args))]
fn cmd_layout(session: &mut Session<'_>, args: &[String]) -> anyhow::Result<()> {
    let today = session.today;
    let layout = &mut session.calendar.layout;
    match args.first().map(String::as_str) {
        None => {}
        Some("col") | Some("column") => {
            let index: usize = required(args, 1, "column index")?
                .parse()
                .context("column index must be a number 0-6")?;
            let delta = parse_delta(required(args, 2, "pixel delta")?)?;
            resize(layout, ResizeTarget::Column(index), delta)?;
        }
        Some("row") => {
            let date = parse_date_arg(required(args, 1, "week start date")?, today)?;
            let delta = parse_delta(required(args, 2, "pixel delta")?)?;
            let key = RowKey::new(start_of_week(date, Weekday::Sun));
            resize(layout, ResizeTarget::Row(key), delta)?;
        }
        Some("stats") => {
            let size = required(args, 1, "size")?;
            layout.stats_width = match parse_px(size) {
                Some(px) if size.trim().parse::<f64>().is_ok() => format!("{px}px"),
                _ => size.to_string(),
            };
        }
        Some("reset") => layout.reset(),
        Some(other) => bail!("unknown layout action: {other} (col, row, stats, reset)"),
    }
    if !args.is_empty() {
        session.save()?;
    }

    let calendar = &session.calendar;
    let visible = calendar.visible_events();
    let month = project(
        &visible,
        &calendar.categories,
        ViewRequest {
            view: ViewKind::Month,
            reference: calendar.settings.reference,
            year_mode: YearMode::List,
        },
    );
    let month = match &month {
        Projection::Month(view) => Some(view),
        _ => None,
    };
    let mut out = io::stdout().lock();
    session.renderer.layout(&mut out, &calendar.layout, month)
}

/// One complete resize gesture: start at pointer 0, drag by `delta`, release.
fn resize(
    layout: &mut crate::layout::LayoutState,
    target: ResizeTarget,
    delta: f64,
) -> anyhow::Result<()> {
    let mut resizer = Resizer::default();
    resizer.begin(layout, target, 0.0)?;
    resizer.drag(layout, delta);
    resizer.finish();
    Ok(())
}

fn parse_delta(raw: &str) -> anyhow::Result<f64> {
    parse_px(raw).ok_or_else(|| anyhow!("invalid pixel delta: {raw}"))
}

fn cmd_help() -> anyhow::Result<()> {
    println!(
        "\
usage: almanac [-v|-q] [--config FILE] [--data DIR] [--rc KEY=VALUE] <command> [args]

events
  add <name...> [date:D] [cat:C] [pri:P] [desc:TEXT]
  modify <id> [name...] [name:..] [date:..] [cat:..] [pri:..] [desc:..]
  move <id> <date>        delete <id>        list        info <id>

views
  month [date]   week [date]   year [date] [list|grid]   next   prev   today

categories and filters
  categories
  category add <name> [color]   category edit <id> [name:..] [color:..]
  category delete <id> [move|delete]
  filter [cat <id> | all | pri <p> | panel]   sort [mode]

query console
  query [sql...]   history   schema

data
  export [path]   import <path>   holidays
  layout [col <i> <px> | row <date> <px> | stats <size> | reset]

dates: YYYY-MM-DD, YYYYMMDD, today, tomorrow, yesterday, weekday names, +3d, -2w, +1m, +1y"
    );
    Ok(())
}
