use std::net::SocketAddr;

use km_core::metrics::PrometheusRecorder;
use metrics::{
    counter,
    gauge,
};
use rocket::State;

pub const RECONCILES_COUNTER: &str = "kmake_reconciles_total";
pub const LEADER_GAUGE: &str = "kmake_leader";

pub fn record_outcome(kind: &str, ok: bool) {
    let result = if ok { "ok" } else { "error" };
    counter!(RECONCILES_COUNTER, "kind" => kind.to_string(), "result" => result).increment(1);
}

pub fn set_leader(leader: bool) {
    gauge!(LEADER_GAUGE).set(if leader { 1.0 } else { 0.0 });
}

// "0" turns the endpoint off
pub fn parse_metrics_addr(addr: &str) -> anyhow::Result<Option<SocketAddr>> {
    match addr {
        "0" => Ok(None),
        addr => Ok(Some(addr.parse()?)),
    }
}

#[rocket::get("/metrics")]
fn scrape(recorder: &State<PrometheusRecorder>) -> String {
    recorder.render()
}

#[rocket::get("/healthz")]
fn healthz() -> &'static str {
    "ok"
}

pub fn build_server(addr: SocketAddr, recorder: PrometheusRecorder) -> rocket::Rocket<rocket::Build> {
    let config = rocket::Config {
        address: addr.ip(),
        port: addr.port(),
        log_level: rocket::config::LogLevel::Critical,
        ..Default::default()
    };
    rocket::custom(&config)
        .mount("/", rocket::routes![scrape, healthz])
        .manage(recorder)
}
