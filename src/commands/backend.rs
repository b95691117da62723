use anyhow::Result;
use chrono::Utc;

use crate::backend::{BackendClient, TableSelection};
use crate::cli::{BackendAction, BackendArgs};
use crate::commands::open_session;

pub fn run(args: BackendArgs) -> Result<()> {
    let selection = if args.tables.is_empty() {
        TableSelection::All
    } else {
        TableSelection::Names(args.tables.clone())
    };

    match args.action {
        BackendAction::Build => {
            let mut session = open_session(&args.run, false)?;
            session.backend.build(&session.platform, &selection);
            print_row_counts(&session.backend, &selection);
        }
        BackendAction::Save => {
            let mut session = open_session(&args.run, false)?;
            session.backend.build(&session.platform, &selection);
            session.backend.save(Utc::now(), &selection);
            print_row_counts(&session.backend, &selection);
        }
        BackendAction::Status => {
            let session = open_session(&args.run, false)?;
            for name in selection.resolve() {
                match session.backend.latest_saved(name)? {
                    Some(path) => println!("{name:<28} {path}"),
                    None => println!("{name:<28} (never saved)"),
                }
            }
        }
    }
    Ok(())
}

fn print_row_counts(backend: &BackendClient, selection: &TableSelection) {
    for name in selection.resolve() {
        match backend.row_count(name) {
            Some(rows) => println!("{name:<28} {rows} row(s)"),
            None => println!("{name:<28} (absent)"),
        }
    }
}
