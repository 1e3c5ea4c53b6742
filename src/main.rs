use std::path::PathBuf;
use std::process;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use serde_json::{Map, Value};
use sqlx::SqlitePool;

use kinledger_lib::census::{self, ReconcileError};
use kinledger_lib::entity::{self, ListQuery};
use kinledger_lib::geo::{self, LinkTarget, SubdivisionMode};
use kinledger_lib::linkage::{self, AcceptDefaults, Direction, LinkageSession};
use kinledger_lib::people::{self, NewPerson};
use kinledger_lib::{migrate, AppConfig, AppError, HouseholdKey};

/// Exit code when reconciliation left census rows unlinked and rolled back.
const EXIT_RECONCILE_INCOMPLETE: i32 = 2;

#[derive(Debug, Parser)]
#[command(name = "kinledger", about = "Census households and land records", version)]
struct Cli {
    /// Database file. Overrides KINLEDGER_DB.
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Schema migrations.
    #[command(subcommand)]
    Db(DbCommand),
    /// Household reconciliation over census rows.
    #[command(subcommand)]
    Census(CensusCommand),
    /// Inspect and edit one census household.
    #[command(subcommand)]
    Household(HouseholdCommand),
    #[command(subcommand)]
    People(PeopleCommand),
    /// Generic record listing and deletion.
    #[command(subcommand)]
    Entity(EntityCommand),
    /// Legal descriptions, boundaries and map links.
    #[command(subcommand)]
    Geo(GeoCommand),
}

#[derive(Debug, Subcommand)]
enum DbCommand {
    /// Apply pending migrations.
    Migrate,
    /// List migrations and whether they are applied.
    Status {
        #[arg(long)]
        json: bool,
    },
}

#[derive(Debug, Subcommand)]
enum CensusCommand {
    /// Report unlinked rows and membership gaps without changing anything.
    Audit {
        #[arg(long)]
        json: bool,
    },
    /// Link every unlinked census row to a household group, or change nothing.
    Reconcile {
        #[arg(long)]
        json: bool,
    },
}

#[derive(Debug, Args)]
struct HouseholdArgs {
    #[arg(long)]
    year: i64,
    #[arg(long)]
    dwelling: String,
}

impl HouseholdArgs {
    fn key(&self) -> HouseholdKey {
        HouseholdKey::new(self.year, self.dwelling.trim())
    }
}

#[derive(Debug, Subcommand)]
enum HouseholdCommand {
    /// Members in display order.
    Show {
        #[command(flatten)]
        household: HouseholdArgs,
        #[arg(long)]
        json: bool,
    },
    /// Family of the anchor person who could join the household.
    Candidates {
        #[command(flatten)]
        household: HouseholdArgs,
        #[arg(long)]
        anchor: i64,
        #[arg(long)]
        json: bool,
    },
    /// Stage changes, print the summary, and save them with --yes.
    Edit {
        #[command(flatten)]
        household: HouseholdArgs,
        #[arg(long)]
        anchor: i64,
        #[arg(long = "link", value_name = "PERSON_ID")]
        link: Vec<i64>,
        #[arg(long = "unlink", value_name = "PERSON_ID")]
        unlink: Vec<i64>,
        #[arg(long = "up", value_name = "PERSON_ID")]
        up: Vec<i64>,
        #[arg(long = "down", value_name = "PERSON_ID")]
        down: Vec<i64>,
        /// Apply the changes instead of only printing them.
        #[arg(long)]
        yes: bool,
    },
}

#[derive(Debug, Subcommand)]
enum PeopleCommand {
    Search {
        term: String,
        #[arg(long, default_value_t = 25)]
        limit: i64,
        #[arg(long)]
        json: bool,
    },
    Add(AddPersonArgs),
    /// Delete a person with no residency, marriage or parentage references.
    Delete { id: i64 },
}

#[derive(Debug, Args)]
struct AddPersonArgs {
    #[arg(long)]
    first: Option<String>,
    #[arg(long)]
    middle: Option<String>,
    #[arg(long)]
    last: Option<String>,
    #[arg(long)]
    married_name: Option<String>,
    #[arg(long)]
    birth_date: Option<String>,
    #[arg(long)]
    birth_location: Option<String>,
    #[arg(long)]
    death_date: Option<String>,
    #[arg(long)]
    father: Option<i64>,
    #[arg(long)]
    mother: Option<i64>,
    #[arg(long)]
    spouse: Option<i64>,
    #[arg(long)]
    marriage_date: Option<String>,
    #[arg(long)]
    notes: Option<String>,
}

impl From<AddPersonArgs> for NewPerson {
    fn from(args: AddPersonArgs) -> Self {
        NewPerson {
            first_name: args.first,
            middle_name: args.middle,
            last_name: args.last,
            married_name: args.married_name,
            birth_date: args.birth_date,
            birth_location: args.birth_location,
            death_date: args.death_date,
            death_location: None,
            father: args.father,
            mother: args.mother,
            spouse: args.spouse,
            marriage_date: args.marriage_date,
            notes: args.notes,
        }
    }
}

#[derive(Debug, Subcommand)]
enum EntityCommand {
    List {
        entity: String,
        #[arg(long)]
        search: Option<String>,
        #[arg(long)]
        sort: Option<String>,
        #[arg(long)]
        desc: bool,
        #[arg(long)]
        limit: Option<i64>,
        #[arg(long)]
        offset: Option<i64>,
    },
    Show {
        entity: String,
        id: i64,
    },
    /// Create a record from a JSON object of field values.
    Create {
        entity: String,
        data: String,
    },
    /// Update fields of a record from a JSON object.
    Update {
        entity: String,
        id: i64,
        data: String,
    },
    Delete {
        entity: String,
        id: i64,
    },
}

#[derive(Debug, Subcommand)]
enum GeoCommand {
    /// Parse a legal description and print its parts.
    Parse { text: String },
    /// Subdivide a stored section boundary per a stored legal description.
    Subdivide {
        #[arg(long)]
        legal_id: i64,
        #[arg(long)]
        section_id: i64,
        /// vertex (default) or bbox.
        #[arg(long, default_value = "vertex")]
        mode: String,
    },
    /// Print the boundaries attached to a legal description as GeoJSON.
    Show {
        #[arg(long)]
        legal_id: i64,
    },
    /// Map links for a coordinate.
    Tile {
        #[arg(long, allow_negative_numbers = true)]
        lat: f64,
        #[arg(long, allow_negative_numbers = true)]
        lon: f64,
        #[arg(long, default_value_t = 15)]
        zoom: u8,
    },
}

fn main() {
    let cli = Cli::parse();
    let config = match AppConfig::resolve(cli.db.clone()) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("Error: {err:#}");
            process::exit(1);
        }
    };
    let guard = match kinledger_lib::init_logging(&config.log) {
        Ok(guard) => guard,
        Err(err) => {
            eprintln!("Warning: file logging disabled: {err:#}");
            None
        }
    };

    let code = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("start async runtime")
    {
        Ok(runtime) => match runtime.block_on(run(cli.command, &config)) {
            Ok(code) => code,
            Err(err) => {
                eprintln!("Error: {err:#}");
                1
            }
        },
        Err(err) => {
            eprintln!("Error: {err:#}");
            1
        }
    };
    drop(guard);
    process::exit(code);
}

async fn run(command: Commands, config: &AppConfig) -> Result<i32> {
    tracing::debug!(target: "kinledger", event = "cli_start", db = %config.db_path.display());
    let pool = match &command {
        Commands::Db(_) => kinledger_lib::db::open_sqlite_pool(&config.db_path).await,
        _ => kinledger_lib::open_database(&config.db_path).await,
    }
    .with_context(|| format!("open database {}", config.db_path.display()))?;
    let result = match command {
        Commands::Db(cmd) => handle_db(&pool, cmd).await,
        Commands::Census(cmd) => handle_census(&pool, cmd).await,
        Commands::Household(cmd) => handle_household(&pool, cmd).await,
        Commands::People(cmd) => handle_people(&pool, cmd).await,
        Commands::Entity(cmd) => handle_entity(&pool, cmd).await,
        Commands::Geo(cmd) => handle_geo(&pool, cmd).await,
    };
    pool.close().await;
    result
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value).context("serialize output")?;
    println!("{json}");
    Ok(())
}

async fn handle_db(pool: &SqlitePool, command: DbCommand) -> Result<i32> {
    match command {
        DbCommand::Migrate => {
            migrate::apply_migrations(pool).await?;
            println!("Database schema is up to date.");
        }
        DbCommand::Status { json } => {
            let status = migrate::migration_status(pool).await?;
            if json {
                print_json(&status)?;
            } else {
                for state in &status {
                    let label = if state.applied { "applied" } else { "pending" };
                    println!("{:<40} {label}", state.version);
                }
            }
        }
    }
    Ok(0)
}

async fn handle_census(pool: &SqlitePool, command: CensusCommand) -> Result<i32> {
    match command {
        CensusCommand::Audit { json } => {
            let report = census::audit(pool).await?;
            if json {
                print_json(&report)?;
            } else {
                println!("Census rows          : {}", report.total_rows);
                println!("Unlinked rows        : {}", report.unlinked_rows);
                println!("Missing memberships  : {}", report.missing_memberships);
                println!("Split households     : {}", report.split_households.len());
                for group in &report.orphan_groups {
                    println!(
                        "  orphan household {:<12} census ids {:?}",
                        group.key.to_string(),
                        group.census_ids
                    );
                }
                for split in &report.split_households {
                    println!(
                        "  household {:<12} spread over groups {:?}",
                        split.key.to_string(),
                        split.res_group_ids
                    );
                }
            }
            Ok(0)
        }
        CensusCommand::Reconcile { json } => match census::reconcile(pool).await {
            Ok(report) => {
                if json {
                    print_json(&report)?;
                } else if report.changed_anything() {
                    println!(
                        "Linked {} census rows: {} groups created, {} reused, {} memberships added, {} backfilled.",
                        report.rows_linked,
                        report.groups_created,
                        report.groups_reused,
                        report.memberships_inserted,
                        report.memberships_backfilled
                    );
                } else {
                    println!("Nothing to reconcile.");
                }
                Ok(0)
            }
            Err(err @ ReconcileError::Incomplete { .. }) => {
                eprintln!("Error: {}", AppError::from(err));
                Ok(EXIT_RECONCILE_INCOMPLETE)
            }
            Err(err) => Err(AppError::from(err).into()),
        },
    }
}

fn print_members(session: &LinkageSession) {
    println!("Household {}", session.key());
    for id in session.effective_members() {
        let name = session
            .member(id)
            .map(|m| m.person.display_name())
            .unwrap_or_else(|| format!("Person #{id}"));
        println!("  {id:>6}  {name}");
    }
}

async fn handle_household(pool: &SqlitePool, command: HouseholdCommand) -> Result<i32> {
    match command {
        HouseholdCommand::Show { household, json } => {
            let session = LinkageSession::open(pool, household.key())
                .await
                .map_err(AppError::from)?;
            if json {
                print_json(session.members())?;
            } else {
                print_members(&session);
            }
        }
        HouseholdCommand::Candidates {
            household,
            anchor,
            json,
        } => {
            let session = LinkageSession::load(pool, household.key(), anchor)
                .await
                .map_err(AppError::from)?;
            let candidates = linkage::family_candidates(pool, &session).await?;
            if json {
                print_json(&candidates)?;
            } else if candidates.is_empty() {
                println!("No family members outside this household.");
            } else {
                for c in &candidates {
                    println!(
                        "  {:>6}  {:<8} {}",
                        c.person.id,
                        c.relationship.label(),
                        c.person.display_name()
                    );
                }
            }
        }
        HouseholdCommand::Edit {
            household,
            anchor,
            link,
            unlink,
            up,
            down,
            yes,
        } => {
            let mut session = LinkageSession::load(pool, household.key(), anchor)
                .await
                .map_err(AppError::from)?;
            for id in link {
                linkage::stage_person(pool, &mut session, id).await?;
            }
            for id in unlink {
                session.unlink(id).map_err(AppError::from)?;
            }
            for id in up {
                session.reorder(id, Direction::Up).map_err(AppError::from)?;
            }
            for id in down {
                session
                    .reorder(id, Direction::Down)
                    .map_err(AppError::from)?;
            }

            let summary = linkage::summary(pool, &session).await?;
            println!("{summary}");
            if summary.is_empty() {
                return Ok(0);
            }
            if !yes {
                println!("Re-run with --yes to save these changes.");
                return Ok(0);
            }
            let report = linkage::apply(pool, &session, &mut AcceptDefaults)
                .await
                .map_err(AppError::from)?;
            println!(
                "Saved: {} added, {} removed, {} moved.",
                report.added, report.removed, report.reordered
            );
        }
    }
    Ok(0)
}

async fn handle_people(pool: &SqlitePool, command: PeopleCommand) -> Result<i32> {
    match command {
        PeopleCommand::Search { term, limit, json } => {
            let found = people::search_people(pool, &term, limit).await?;
            if json {
                print_json(&found)?;
            } else {
                for p in &found {
                    let born = p.birth_date.as_deref().unwrap_or("-");
                    println!("  {:>6}  {:<30} b. {born}", p.id, p.display_name());
                }
            }
        }
        PeopleCommand::Add(args) => {
            let id = people::create_person(pool, args.into()).await?;
            println!("{id}");
        }
        PeopleCommand::Delete { id } => {
            people::delete_person(pool, id).await?;
            println!("Deleted person {id}.");
        }
    }
    Ok(0)
}

fn parse_object(raw: &str) -> Result<Map<String, Value>> {
    match serde_json::from_str::<Value>(raw).context("parse record JSON")? {
        Value::Object(map) => Ok(map),
        _ => anyhow::bail!("record data must be a JSON object"),
    }
}

async fn handle_entity(pool: &SqlitePool, command: EntityCommand) -> Result<i32> {
    match command {
        EntityCommand::List {
            entity: name,
            search,
            sort,
            desc,
            limit,
            offset,
        } => {
            let schema = entity::schema(&name)?;
            let query = ListQuery {
                search,
                sort,
                descending: desc,
                limit,
                offset,
            };
            let rows = entity::list(pool, schema, &query).await?;
            print_json(&rows)?;
        }
        EntityCommand::Show { entity: name, id } => {
            let schema = entity::schema(&name)?;
            match entity::get(pool, schema, id).await? {
                Some(row) => print_json(&row)?,
                None => {
                    eprintln!("No {name} record with id {id}.");
                    return Ok(1);
                }
            }
        }
        EntityCommand::Create { entity: name, data } => {
            let schema = entity::schema(&name)?;
            let id = entity::create(pool, schema, parse_object(&data)?).await?;
            println!("{id}");
        }
        EntityCommand::Update {
            entity: name,
            id,
            data,
        } => {
            let schema = entity::schema(&name)?;
            entity::update(pool, schema, id, parse_object(&data)?).await?;
            println!("Updated {name} {id}.");
        }
        EntityCommand::Delete { entity: name, id } => {
            let schema = entity::schema(&name)?;
            entity::delete(pool, schema, id).await?;
            println!("Deleted {name} {id}.");
        }
    }
    Ok(0)
}

async fn handle_geo(pool: &SqlitePool, command: GeoCommand) -> Result<i32> {
    match command {
        GeoCommand::Parse { text } => {
            let parsed = geo::parse_legal_description(&text).map_err(AppError::from)?;
            print_json(&serde_json::json!({
                "section": parsed.section,
                "township": parsed.township,
                "range": parsed.range,
                "parts": parsed.parts.iter().map(ToString::to_string).collect::<Vec<_>>(),
                "steps": parsed.steps().iter().map(ToString::to_string).collect::<Vec<_>>(),
            }))?;
        }
        GeoCommand::Subdivide {
            legal_id,
            section_id,
            mode,
        } => {
            let mode: SubdivisionMode = mode.parse().map_err(AppError::from)?;
            let out = geo::subdivide_legal_description(pool, legal_id, section_id, mode).await?;
            if let Some(boundary) = geo::get_boundary(pool, out.stored.id).await? {
                print_json(&geo::feature_json(&boundary))?;
            }
        }
        GeoCommand::Show { legal_id } => {
            let boundaries =
                geo::boundaries_for(pool, &LinkTarget::LegalDescription(legal_id)).await?;
            let features: Vec<Value> = boundaries.iter().map(geo::feature_json).collect();
            print_json(&serde_json::json!({
                "type": "FeatureCollection",
                "features": features,
            }))?;
        }
        GeoCommand::Tile { lat, lon, zoom } => {
            let tile = geo::tile_for(lat, lon, zoom).map_err(AppError::from)?;
            println!("{}", geo::google_maps_link(lat, lon).map_err(AppError::from)?);
            println!("{}", geo::tile_url(tile));
        }
    }
    Ok(0)
}
