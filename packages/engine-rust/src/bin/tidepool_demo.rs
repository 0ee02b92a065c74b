//! `tidepool-demo`: walks through every engine component.
//!
//! Sections run in order: geography, repositories, pub/sub, caching.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use anyhow::Context;
use clap::{Parser, ValueEnum};
use metrics::{describe_counter, Unit};
use tidepool_engine::pubsub::Message;
use tidepool_engine::{
    DistanceUnit, Engine, EngineConfig, Entity, IndexValue, IndexedField, Point, RecordId,
};
use tracing::info;
use tracing_subscriber::layer::{Layer, SubscriberExt};
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser, Debug)]
#[command(name = "tidepool-demo", version, about = "Tidepool engine walkthrough", long_about = None)]
struct Cli {
    /// JSON engine configuration file
    #[arg(long, env = "TIDEPOOL_CONFIG")]
    config: Option<PathBuf>,

    /// Override the default cache TTL in milliseconds
    #[arg(long, env = "TIDEPOOL_CACHE_TTL_MS")]
    cache_ttl_ms: Option<u64>,

    /// Simulated latency of the uncached order lookup
    #[arg(long, env = "TIDEPOOL_PRODUCER_DELAY_MS", default_value_t = 1_000)]
    producer_delay_ms: u64,

    #[arg(long, value_enum, env = "TIDEPOOL_LOG_FORMAT", default_value_t = LogFormat::Pretty)]
    log_format: LogFormat,

    /// Run only these sections (repeatable); all when omitted
    #[arg(long = "section", value_enum)]
    sections: Vec<Section>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    Pretty,
    Json,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum Section {
    Geography,
    Repositories,
    Pubsub,
    Caching,
}

const ALL_SECTIONS: [Section; 4] = [
    Section::Geography,
    Section::Repositories,
    Section::Pubsub,
    Section::Caching,
];

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_format)?;

    let mut config = match &cli.config {
        Some(path) => EngineConfig::from_json_file(path)?,
        None => EngineConfig::default(),
    };
    if let Some(ttl) = cli.cache_ttl_ms {
        config.cache.default_ttl_ms = ttl;
    }

    let engine = Engine::new(config)?;
    engine.start_background();

    let sections: &[Section] = if cli.sections.is_empty() {
        &ALL_SECTIONS
    } else {
        &cli.sections
    };
    for section in sections {
        match section {
            Section::Geography => geography(&engine)?,
            Section::Repositories => repositories(&engine)?,
            Section::Pubsub => publish_subscribe(&engine).await?,
            Section::Caching => {
                caching(&engine, Duration::from_millis(cli.producer_delay_ms)).await?;
            }
        }
    }

    engine.shutdown().await;
    Ok(())
}

fn init_tracing(format: LogFormat) -> anyhow::Result<()> {
    describe_metrics();

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let fmt_layer = match format {
        LogFormat::Json => fmt::layer().json().with_target(true).boxed(),
        LogFormat::Pretty => fmt::layer().with_target(false).boxed(),
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .try_init()
        .context("failed to install tracing subscriber")
}

fn describe_metrics() {
    describe_counter!("tidepool_cache_hits_total", Unit::Count, "Cache reads answered from a live entry.");
    describe_counter!("tidepool_cache_misses_total", Unit::Count, "Cache reads that joined or started a computation.");
    describe_counter!("tidepool_pubsub_published_total", Unit::Count, "Messages published to the broker.");
    describe_counter!(
        "tidepool_pubsub_delivery_failures_total",
        Unit::Count,
        "Messages a listener failed to handle or never received."
    );
}

fn title(name: &str) {
    info!("{}:", name.to_uppercase());
}

// ---------------------------------------------------------------------------
// Geography
// ---------------------------------------------------------------------------

fn geography(engine: &Engine) -> anyhow::Result<()> {
    title("Geography");
    let geo = engine.geo();

    geo.add_point("Sicily", "Arigento", Point::new(38.115_556, 13.361_389))?;
    geo.add_point("Sicily", "Catania", Point::new(37.502_669, 15.087_269))?;
    geo.add_point("Sicily", "Palermo", Point::new(37.316_667, 13.583_333))?;

    let center = Point::new(37.316_667, 13.583_333);
    let unit = DistanceUnit::Kilometers;
    let results = geo.radius_query("Sicily", center, 100.0, unit)?;
    info!(set = "Sicily", %center, radius = 100, %unit, matches = results.len(), "radius query");
    for result in &results {
        info!(
            member = %result.member,
            distance = %format!("{:.4} {unit}", result.distance),
            point = %result.point,
            "geo result"
        );
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Hash repositories
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
struct LineItem {
    id: Option<RecordId>,
    order_id: RecordId,
    description: String,
}

impl Entity for LineItem {
    const KIND: &'static str = "line_item";

    fn id(&self) -> Option<RecordId> {
        self.id
    }

    fn set_id(&mut self, id: RecordId) {
        self.id = Some(id);
    }

    fn indexed_fields(&self) -> Vec<IndexedField> {
        vec![IndexedField::new("order_id", self.order_id)]
    }
}

#[derive(Debug, Clone)]
struct Order {
    id: Option<RecordId>,
    date_ms: i64,
    line_item_ids: Vec<RecordId>,
}

impl Order {
    fn now(id: Option<RecordId>, line_item_ids: Vec<RecordId>) -> Self {
        let date_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_or(0, |d| i64::try_from(d.as_millis()).unwrap_or(i64::MAX));
        Self {
            id,
            date_ms,
            line_item_ids,
        }
    }
}

impl Entity for Order {
    const KIND: &'static str = "order";

    fn id(&self) -> Option<RecordId> {
        self.id
    }

    fn set_id(&mut self, id: RecordId) {
        self.id = Some(id);
    }

    fn indexed_fields(&self) -> Vec<IndexedField> {
        vec![IndexedField::new("date", IndexValue::Timestamp(self.date_ms))]
    }
}

fn repositories(engine: &Engine) -> anyhow::Result<()> {
    title("Hash Repositories");
    let orders = engine.store::<Order>();
    let line_items = engine.store::<LineItem>();

    // Reserve the order id first so line items can point at it.
    let order = orders.put(Order::now(None, Vec::new()))?;
    let order_id = order.id.context("stored order has an id")?;

    let mut item_ids = Vec::new();
    for description in ["plunger", "soup", "coffee mug"] {
        let saved = line_items.put(LineItem {
            id: None,
            order_id,
            description: description.to_string(),
        })?;
        info!(id = ?saved.id, order_id = %saved.order_id, description = %saved.description, "saved");
        item_ids.extend(saved.id);
    }

    for item in line_items.find_by_index("order_id", order_id) {
        info!(kind = LineItem::KIND, order_id = %item.order_id, id = ?item.id, "found");
    }

    orders.put(Order {
        line_item_ids: item_ids,
        ..order
    })?;
    let stored = orders.get(order_id)?;
    let resolved = line_items.find_all_by_id(stored.line_item_ids.iter().copied());
    info!(order = ?stored, line_items = resolved.len(), "saved");
    Ok(())
}

// ---------------------------------------------------------------------------
// Publish/subscribe
// ---------------------------------------------------------------------------

async fn publish_subscribe(engine: &Engine) -> anyhow::Result<()> {
    title("Publish/Subscribe");
    let broker = engine.broker();
    let (done_tx, mut done_rx) = tokio::sync::mpsc::unbounded_channel();

    let handle = broker.subscribe("chat", move |message: &Message| -> anyhow::Result<()> {
        info!(
            "message from '{}': {}",
            message.pattern,
            message.payload_str().unwrap_or("<binary>")
        );
        done_tx.send(())?;
        Ok(())
    })?;

    info!("sending message to 'chat'");
    let receivers = broker.publish("chat", "Hello, world");

    for _ in 0..receivers {
        tokio::time::timeout(Duration::from_secs(5), done_rx.recv())
            .await
            .context("listener did not receive the message")?;
    }
    broker.unsubscribe(handle);
    Ok(())
}

// ---------------------------------------------------------------------------
// Caching
// ---------------------------------------------------------------------------

/// Slow order lookup; answers are memoised in the `order` cache.
struct OrderService {
    orders: HashMap<i64, Order>,
    delay: Duration,
}

impl OrderService {
    fn new(delay: Duration) -> anyhow::Result<Self> {
        let mut orders = HashMap::new();
        for raw in 1..=3 {
            let id = RecordId::new(raw).context("order ids are positive")?;
            orders.insert(raw, Order::now(Some(id), Vec::new()));
        }
        Ok(Self { orders, delay })
    }

    async fn by_id(&self, id: i64) -> anyhow::Result<Option<Order>> {
        tokio::time::sleep(self.delay).await;
        Ok(self.orders.get(&id).cloned())
    }
}

async fn caching(engine: &Engine, delay: Duration) -> anyhow::Result<()> {
    title("Caching");
    let cache = engine.caches().cache::<i64, Option<Order>>("order")?;
    let service = Arc::new(OrderService::new(delay)?);
    let by_id = cache.wrap(move |id: i64| {
        let service = Arc::clone(&service);
        async move { service.by_id(id).await }
    });

    for label in ["first", "second", "third"] {
        let start = Instant::now();
        let order = by_id.call(1).await?;
        let elapsed_ms = u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX);
        info!(elapsed_ms, found = order.is_some(), "{label}");
    }
    info!(stats = ?cache.stats(), "order cache");
    Ok(())
}
