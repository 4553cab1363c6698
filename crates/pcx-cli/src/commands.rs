use std::sync::Arc;

use colored::Colorize;
use serde::Serialize;
use serde_json::Value;
use tracing::info;

use pcx_context::{Context, ContextConfig, DataChannel, PersistentObject};
use pcx_event::{EventFilter, EventStream};
use pcx_store::{InMemoryDataStore, StoreConfig};

use crate::cli::*;
use crate::model::{demo_model, load_model};

pub fn run_command(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Command::CheckConfig(args) => cmd_check_config(args, cli.format),
        Command::CheckModel(args) => cmd_check_model(args, cli.format),
        Command::Demo(args) => cmd_demo(args, cli.format),
    }
}

fn cmd_check_config(args: CheckConfigArgs, format: OutputFormat) -> anyhow::Result<()> {
    let config = match args.kind {
        ConfigKind::Context => serde_json::to_value(ContextConfig::load(&args.path)?)?,
        ConfigKind::Store => serde_json::to_value(StoreConfig::load(&args.path)?)?,
    };
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&config)?),
        OutputFormat::Text => {
            println!("{} {} is a valid {:?} configuration", "✓".green().bold(), args.path.display(), args.kind);
            if let Value::Object(fields) = &config {
                for (key, value) in fields {
                    println!("  {}: {}", key, value.to_string().cyan());
                }
            }
        }
    }
    Ok(())
}

fn cmd_check_model(args: CheckModelArgs, format: OutputFormat) -> anyhow::Result<()> {
    let resolver = load_model(&args.path)?;
    let names = resolver.entity_names();
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&names)?),
        OutputFormat::Text => {
            println!("{} {} entities in {}", "✓".green().bold(), names.len(), args.path.display());
            for name in &names {
                let entity = resolver.entity(name)?;
                println!(
                    "  {} key={} attributes={} relationships={}",
                    name.yellow(),
                    entity.primary_key.join(","),
                    entity.attributes.len(),
                    entity.relationships.len()
                );
            }
        }
    }
    Ok(())
}

#[derive(Debug, Serialize)]
struct ObjectSummary {
    id: String,
    state: String,
}

#[derive(Debug, Serialize)]
struct StepSummary {
    step: &'static str,
    objects: Vec<ObjectSummary>,
}

#[derive(Debug, Serialize)]
struct EventSummary {
    seq: u64,
    subject: String,
    topic: String,
    changes: usize,
}

#[derive(Debug, Serialize)]
struct DemoReport {
    steps: Vec<StepSummary>,
    rows: Vec<(String, Value)>,
    events: Vec<EventSummary>,
    store_syncs: usize,
}

fn summarize(step: &'static str, objects: &[Arc<PersistentObject>]) -> StepSummary {
    StepSummary {
        step,
        objects: objects
            .iter()
            .map(|o| ObjectSummary {
                id: o.object_id().to_string(),
                state: o.persistence_state().to_string(),
            })
            .collect(),
    }
}

fn drain(stream: &mut EventStream) -> Vec<EventSummary> {
    let mut events = Vec::new();
    while let Ok(event) = stream.try_recv() {
        events.push(EventSummary {
            seq: event.seq,
            subject: event.subject.to_string(),
            topic: event.topic.to_string(),
            changes: event.diff.atomic_len(),
        });
    }
    events
}

/// Edit in a child context, flush into its parent, then commit the parent
/// to the store or roll it back.
fn run_demo(args: &DemoArgs) -> anyhow::Result<DemoReport> {
    let store_config = match args.store_config.as_deref() {
        Some(path) => StoreConfig::load(path)?,
        None => StoreConfig::default(),
    };
    let context_config = match args.context_config.as_deref() {
        Some(path) => ContextConfig::load(path)?,
        None => ContextConfig {
            lifecycle_events: true,
            inherit_events: true,
            ..ContextConfig::default()
        },
    };

    let store = InMemoryDataStore::with_config(demo_model(), store_config);
    let upstream: Arc<dyn DataChannel> = store.clone();
    let parent = Context::with_config(upstream, context_config)?;
    let mut stream = parent.events().subscribe_stream(EventFilter::all());
    let child = parent.create_child_context()?;
    info!(parent = %parent.id(), child = %child.id(), "demo contexts ready");

    let artist = child.new_object("Artist")?;
    child.set_attribute(&artist, "name", "Monet")?;
    child.set_attribute(&artist, "born", 1840)?;
    for n in 1..=args.paintings {
        let painting = child.new_object("Painting")?;
        child.set_attribute(&painting, "title", format!("Water Lilies {n}"))?;
        child.set_to_one(&painting, "artist", Some(&artist))?;
    }

    let mut steps = vec![summarize("edited in child", &child.uncommitted_objects())];
    child.commit_to_parent()?;
    steps.push(summarize("flushed to parent", &parent.uncommitted_objects()));

    let tracked: Vec<_> = parent
        .new_objects()
        .into_iter()
        .chain(parent.modified_objects())
        .collect();
    if args.rollback {
        parent.rollback()?;
        steps.push(summarize("rolled back", &tracked));
    } else {
        parent.commit()?;
        steps.push(summarize("committed", &tracked));
    }

    let rows = ["Artist", "Painting"]
        .into_iter()
        .flat_map(|entity| store.ids_of(entity))
        .filter_map(|id| {
            let values = store.row(&id)?;
            Some((id.to_string(), serde_json::to_value(values).unwrap_or(Value::Null)))
        })
        .collect();

    Ok(DemoReport {
        steps,
        rows,
        events: drain(&mut stream),
        store_syncs: store.sync_count(),
    })
}

fn cmd_demo(args: DemoArgs, format: OutputFormat) -> anyhow::Result<()> {
    let report = run_demo(&args)?;
    if format == OutputFormat::Json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    for step in &report.steps {
        println!("{}", step.step.bold());
        for object in &step.objects {
            println!("  {} {}", object.id.yellow(), object.state.cyan());
        }
    }
    println!("{} ({} syncs)", "Store rows".bold(), report.store_syncs);
    if report.rows.is_empty() {
        println!("  (none)");
    }
    for (id, values) in &report.rows {
        println!("  {} {}", id.yellow(), values);
    }
    println!("{}", "Events".bold());
    for event in &report.events {
        println!(
            "  #{} {} {} ({} changes)",
            event.seq,
            event.subject.dimmed(),
            event.topic.green(),
            event.changes
        );
    }
    let outcome = if args.rollback { "Rolled back" } else { "Committed" };
    println!("{} {}", "✓".green().bold(), outcome);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn demo_args() -> DemoArgs {
        DemoArgs {
            context_config: None,
            store_config: None,
            rollback: false,
            paintings: 2,
        }
    }

    #[test]
    fn demo_commit_writes_rows() {
        let report = run_demo(&demo_args()).unwrap();
        assert_eq!(report.rows.len(), 3);
        assert_eq!(report.store_syncs, 1);

        let committed = report.steps.last().unwrap();
        assert_eq!(committed.objects.len(), 3);
        assert!(committed.objects.iter().all(|o| o.state == "committed"));
        assert!(report.events.iter().any(|e| e.topic == "Committed"));
    }

    #[test]
    fn demo_rollback_leaves_store_empty() {
        let args = DemoArgs {
            rollback: true,
            ..demo_args()
        };
        let report = run_demo(&args).unwrap();
        assert!(report.rows.is_empty());
        assert!(report.steps.last().unwrap().objects.iter().all(|o| o.state == "transient"));
        assert!(report.events.iter().any(|e| e.topic == "RolledBack"));
    }

    #[test]
    fn demo_honours_store_config() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "first_key = 100").unwrap();
        let args = DemoArgs {
            store_config: Some(file.path().to_path_buf()),
            paintings: 0,
            ..demo_args()
        };
        let report = run_demo(&args).unwrap();
        assert_eq!(report.rows.len(), 1);
        assert!(report.rows[0].0.contains("100"));
    }

    #[test]
    fn bad_store_config_fails_demo() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "key_step = -1").unwrap();
        let args = DemoArgs {
            store_config: Some(file.path().to_path_buf()),
            ..demo_args()
        };
        assert!(run_demo(&args).is_err());
    }
}
