// Static schedule API server
// Next departures and arrival times from a periodically refreshed GTFS feed

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use actix_cors::Cors;
use actix_web::{middleware, web, App, HttpResponse, HttpServer};
use chrono::{DateTime, NaiveTime, Utc};
use chrono_tz::Tz;
use clap::Parser;
use log::{error, info, warn};
use serde::{Deserialize, Serialize};
use tokio::time;

use nvt_schedule::clock::localize;
use nvt_schedule::{Config, Departure, Direction, HttpFeedSource, RefreshOutcome, ScheduleEngine};

const REFRESH_CHECK_INTERVAL_SECS: u64 = 3600;
const DEFAULT_DEPARTURE_COUNT: usize = 5;
const MAX_DEPARTURE_COUNT: usize = 50;

#[derive(Parser, Debug)]
#[command(
    name = "nvt-schedule",
    version,
    about = "Serve next departures and arrival times from a static GTFS feed"
)]
struct Args {
    /// URL of the zipped static feed
    #[arg(long, default_value = nvt_schedule::config::DEFAULT_FEED_URL)]
    feed_url: String,

    /// IANA zone the feed's times are expressed in
    #[arg(long, default_value = "Europe/Paris")]
    timezone: String,

    /// Address to listen on
    #[arg(long, default_value = "0.0.0.0")]
    bind: String,

    #[arg(short, long, default_value_t = 8080)]
    port: u16,

    /// Parent directory for temporary extraction
    #[arg(long)]
    scratch_dir: Option<PathBuf>,

    /// Verbose output (show debug messages)
    #[arg(short, long)]
    verbose: bool,
}

type Engine = ScheduleEngine<HttpFeedSource>;

#[derive(Clone)]
struct AppState {
    engine: Arc<Engine>,
}

#[derive(Serialize)]
struct ApiResponse<T> {
    success: bool,
    data: Option<T>,
    error: Option<String>,
    timestamp: i64,
}

impl<T: Serialize> ApiResponse<T> {
    fn success(data: T) -> Self {
        ApiResponse {
            success: true,
            data: Some(data),
            error: None,
            timestamp: Utc::now().timestamp(),
        }
    }

    fn error(message: String) -> Self {
        ApiResponse {
            success: false,
            data: None,
            error: Some(message),
            timestamp: Utc::now().timestamp(),
        }
    }
}

fn bad_request(message: String) -> HttpResponse {
    HttpResponse::BadRequest().json(ApiResponse::<()>::error(message))
}

// ============================================================================
// Request parsing
// ============================================================================

#[derive(Deserialize)]
struct DeparturesQuery {
    stop_id: String,
    direction: u8,
    time: Option<String>,
    count: Option<usize>,
}

#[derive(Deserialize)]
struct ArrivalQuery {
    from: String,
    to: String,
    departure: String,
    direction: u8,
    trip_id: Option<String>,
}

fn parse_direction(raw: u8) -> Result<Direction, String> {
    Direction::try_from(raw).map_err(|d| format!("Invalid direction {} (expected 0 or 1)", d))
}

/// RFC 3339 instant, or `HH:MM[:SS]` on today's date in the feed's zone.
fn parse_time(text: &str, now: DateTime<Tz>) -> Result<DateTime<Tz>, String> {
    if let Ok(instant) = DateTime::parse_from_rfc3339(text) {
        return Ok(instant.with_timezone(&now.timezone()));
    }
    let clock = NaiveTime::parse_from_str(text, "%H:%M")
        .or_else(|_| NaiveTime::parse_from_str(text, "%H:%M:%S"))
        .map_err(|_| format!("Invalid time '{}' (expected HH:MM or RFC 3339)", text))?;
    localize(now.timezone(), now.date_naive().and_time(clock))
        .ok_or_else(|| format!("Time '{}' does not exist today", text))
}

// ============================================================================
// Response bodies
// ============================================================================

#[derive(Serialize)]
struct DepartureView {
    trip_id: String,
    route_id: String,
    direction: Direction,
    destination: String,
    minutes_until: i64,
    scheduled_departure: DateTime<Tz>,
    scheduled_time: String,
}

impl From<Departure> for DepartureView {
    fn from(d: Departure) -> Self {
        DepartureView {
            scheduled_time: d.scheduled_departure.format("%H:%M").to_string(),
            trip_id: d.trip_id,
            route_id: d.route_id,
            direction: d.direction,
            destination: d.destination,
            minutes_until: d.minutes_until,
            scheduled_departure: d.scheduled_departure,
        }
    }
}

#[derive(Serialize)]
struct ArrivalView {
    from: String,
    to: String,
    departure: DateTime<Tz>,
    arrival: DateTime<Tz>,
    arrival_time: String,
    travel_minutes: i64,
}

// ============================================================================
// API Endpoints
// ============================================================================

async fn get_departures(
    state: web::Data<AppState>,
    query: web::Query<DeparturesQuery>,
) -> HttpResponse {
    let query = query.into_inner();
    let direction = match parse_direction(query.direction) {
        Ok(d) => d,
        Err(e) => return bad_request(e),
    };
    let reference = match query.time.as_deref() {
        Some(text) => match parse_time(text, state.engine.now()) {
            Ok(t) => Some(t),
            Err(e) => return bad_request(e),
        },
        None => None,
    };
    let count = query
        .count
        .unwrap_or(DEFAULT_DEPARTURE_COUNT)
        .min(MAX_DEPARTURE_COUNT);

    let departures: Vec<DepartureView> = state
        .engine
        .next_departures(&query.stop_id, direction, reference, count)
        .into_iter()
        .map(DepartureView::from)
        .collect();
    HttpResponse::Ok().json(ApiResponse::success(departures))
}

async fn get_arrival(state: web::Data<AppState>, query: web::Query<ArrivalQuery>) -> HttpResponse {
    let query = query.into_inner();
    let direction = match parse_direction(query.direction) {
        Ok(d) => d,
        Err(e) => return bad_request(e),
    };
    let departure = match parse_time(&query.departure, state.engine.now()) {
        Ok(t) => t,
        Err(e) => return bad_request(e),
    };

    let arrival = match query.trip_id.as_deref() {
        Some(trip_id) => state.engine.arrival_time_for_trip(
            &query.from,
            &query.to,
            departure,
            direction,
            trip_id,
        ),
        None => state
            .engine
            .arrival_time(&query.from, &query.to, departure, direction),
    };

    match arrival {
        Some(arrival) => HttpResponse::Ok().json(ApiResponse::success(ArrivalView {
            arrival_time: arrival.format("%H:%M").to_string(),
            travel_minutes: (arrival - departure).num_minutes(),
            from: query.from,
            to: query.to,
            departure,
            arrival,
        })),
        None => HttpResponse::NotFound().json(ApiResponse::<()>::error(format!(
            "No scheduled trip from '{}' to '{}' near {}",
            query.from,
            query.to,
            departure.format("%H:%M")
        ))),
    }
}

async fn get_stats(state: web::Data<AppState>) -> HttpResponse {
    HttpResponse::Ok().json(ApiResponse::success(state.engine.stats()))
}

async fn force_refresh(state: web::Data<AppState>) -> HttpResponse {
    info!("Manual refresh requested");
    match state.engine.refresh().await {
        Ok(stats) => HttpResponse::Ok().json(ApiResponse::success(stats)),
        Err(e) => HttpResponse::InternalServerError()
            .json(ApiResponse::<()>::error(format!("Refresh failed: {}", e))),
    }
}

async fn health_check(state: web::Data<AppState>) -> HttpResponse {
    let stats = state.engine.stats();
    HttpResponse::Ok().json(serde_json::json!({
        "status": "healthy",
        "service": "nvt-schedule",
        "version": env!("CARGO_PKG_VERSION"),
        "schedule_loaded": stats.loaded,
        "schedule_fresh": stats.fresh,
        "timestamp": Utc::now().timestamp(),
    }))
}

// ============================================================================
// Background Task
// ============================================================================

async fn data_refresh_task(engine: Arc<Engine>) {
    let period = Duration::from_secs(REFRESH_CHECK_INTERVAL_SECS);
    let mut interval = time::interval_at(time::Instant::now() + period, period);

    loop {
        interval.tick().await;

        match engine.ensure_fresh().await {
            Ok(RefreshOutcome::Refreshed(stats)) => {
                info!("Scheduled refresh loaded {} trips", stats.trips)
            }
            Ok(RefreshOutcome::AlreadyFresh) => {}
            Err(e) => warn!("Scheduled refresh failed: {}", e),
        }
    }
}

// ============================================================================
// Server Setup
// ============================================================================

async fn run_server(engine: Arc<Engine>, bind: String, port: u16) -> std::io::Result<()> {
    info!("Loading static schedule...");
    if let Err(e) = engine.ensure_fresh().await {
        error!("Initial schedule load failed: {}", e);
        warn!("Serving empty results until a refresh succeeds");
    }

    tokio::spawn(data_refresh_task(engine.clone()));

    let app_state = AppState { engine };

    println!("\n╔════════════════════════════════════════════════════════════╗");
    println!("║   🚏 Static Schedule Server                                ║");
    println!("╚════════════════════════════════════════════════════════════╝\n");
    println!("🌐 Server running on: http://{}:{}", bind, port);
    println!("🔄 Freshness check: every {} minutes\n", REFRESH_CHECK_INTERVAL_SECS / 60);
    println!("📍 Available Routes:");
    println!("┌─────────────────────────────────────────────────────────────┐");
    println!("│   GET  /api/departures?stop_id=&direction=&time=&count=     │");
    println!("│   GET  /api/arrival?from=&to=&departure=&direction=         │");
    println!("│   GET  /api/stats                  - Snapshot statistics    │");
    println!("│   POST /api/refresh                - Force refresh data     │");
    println!("│   GET  /health                     - Health check           │");
    println!("└─────────────────────────────────────────────────────────────┘\n");

    HttpServer::new(move || {
        App::new()
            .app_data(web::Data::new(app_state.clone()))
            .wrap(Cors::permissive())
            .wrap(middleware::Logger::default())
            .wrap(middleware::Compress::default())
            .route("/health", web::get().to(health_check))
            .service(
                web::scope("/api")
                    .route("/departures", web::get().to(get_departures))
                    .route("/arrival", web::get().to(get_arrival))
                    .route("/stats", web::get().to(get_stats))
                    .route("/refresh", web::post().to(force_refresh)),
            )
    })
    .bind((bind.as_str(), port))?
    .run()
    .await
}

// ============================================================================
// Main Entry Point
// ============================================================================

fn main() -> std::io::Result<()> {
    let args = Args::parse();

    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(if args.verbose { "debug" } else { "info" }),
    )
    .init();

    let mut config = Config::default()
        .with_timezone_name(&args.timezone)
        .map_err(std::io::Error::other)?;
    config.feed_url = args.feed_url;
    if let Some(dir) = args.scratch_dir {
        config.scratch_root = dir;
    }

    info!("Feed: {}", config.feed_url);
    info!("Timezone: {}", config.timezone);
    info!("Scratch directory: {}", config.scratch_root.display());

    let source = HttpFeedSource::new(config.feed_url.clone(), config.request_timeout)
        .map_err(std::io::Error::other)?;
    let engine = Arc::new(ScheduleEngine::new(config, source));

    actix_web::rt::System::new().block_on(run_server(engine, args.bind, args.port))
}
