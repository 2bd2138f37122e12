use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use tracing::info;
use tracing_subscriber::EnvFilter;

use folio_bookstore::{bootstrap, Book, BookScopes, Order, OrderStatus};
use folio_orm::{connect, AttributeEnum, DatabasePool, OrmConfig, QueryMethods, Relation};

#[derive(Parser)]
#[command(name = "folio")]
#[command(about = "Query the bookstore database through the folio relation builder")]
struct Cli {
    /// Database URL; falls back to DATABASE_URL and the ORM_* settings
    #[arg(long, global = true)]
    database_url: Option<String>,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the bookstore tables if they are missing
    Bootstrap,

    /// Print the SQL a named book scope renders, without connecting
    Sql {
        #[arg(value_enum)]
        scope: BookScope,
    },

    /// List books as JSON
    Books {
        #[arg(long)]
        out_of_print: bool,

        /// Only books priced above this amount
        #[arg(long)]
        min_price: Option<f64>,

        /// Include books hidden by the default scope
        #[arg(long)]
        all: bool,

        #[arg(long, default_value = "20")]
        limit: u64,
    },

    /// Count orders per status
    Orders {
        /// Only this status (shipped, being_packed, complete, cancelled)
        #[arg(long)]
        status: Option<String>,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum BookScope {
    InPrint,
    OutOfPrint,
    Old,
    OutOfPrintAndExpensive,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.json_logs);

    match cli.command {
        Commands::Sql { scope } => {
            println!("{}", scope_sql(scope)?);
            Ok(())
        }
        command => {
            let config = load_config(cli.database_url)?;
            let pool = connect(&config.database)
                .await
                .context("Failed to open the database")?;
            let outcome = run(command, pool.as_ref()).await;
            pool.close().await?;
            outcome
        }
    }
}

async fn run(command: Commands, pool: &dyn DatabasePool) -> Result<()> {
    match command {
        Commands::Bootstrap => {
            bootstrap(pool).await?;
            info!("Bookstore tables ready");
        }
        Commands::Books {
            out_of_print,
            min_price,
            all,
            limit,
        } => {
            let mut books = if all {
                Book::unscoped_query()
            } else {
                Book::query()
            };
            if out_of_print {
                books = books.out_of_print();
            }
            if let Some(amount) = min_price {
                books = books.where_gt("price", amount);
            }
            let rows = books.order_by("title").limit(limit).to_json(pool).await?;
            println!("{}", serde_json::to_string_pretty(&rows)?);
        }
        Commands::Orders { status } => {
            let mut orders: Relation<Order> = Order::query();
            if let Some(name) = status {
                let Some(status) = OrderStatus::from_name(&name) else {
                    bail!("Unknown order status '{}'", name);
                };
                orders = orders.with_enum(status);
            }
            for (key, count) in orders.group_by("status").count_by_group(pool).await? {
                let label = key
                    .as_i64()
                    .and_then(OrderStatus::from_value)
                    .map(|status| status.name())
                    .unwrap_or("unknown");
                println!("{:<14}{}", label, count);
            }
        }
        Commands::Sql { scope } => println!("{}", scope_sql(scope)?),
    }
    Ok(())
}

fn scope_sql(scope: BookScope) -> Result<String> {
    let relation = match scope {
        BookScope::InPrint => Book::in_print(),
        BookScope::OutOfPrint => Book::out_of_print(),
        BookScope::Old => Book::old(),
        BookScope::OutOfPrintAndExpensive => Book::out_of_print_and_expensive(),
    };
    Ok(relation.to_sql()?)
}

fn load_config(database_url: Option<String>) -> Result<OrmConfig> {
    let config = match database_url {
        Some(url) => {
            let mut config = OrmConfig::default();
            config.database.url = url;
            config.validate()?;
            config
        }
        None => OrmConfig::from_env().context("No --database-url given")?,
    };
    Ok(config)
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if json {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}
