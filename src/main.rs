use anyhow::Result;
use std::io::Write;

use axpert_bridge::config::Config;
use axpert_bridge::options::Options;

#[tokio::main]
async fn main() -> Result<()> {
    let options = Options::new();

    let config = Config::new(&options).unwrap_or_else(|err| {
        // no logging available yet, so eprintln! will have to do
        eprintln!("Error: {:?}", err);
        std::process::exit(255);
    });

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(config.loglevel()))
        .format(|buf, record| {
            writeln!(
                buf,
                "[{} {} {}] {}",
                chrono::Local::now().format("%Y-%m-%dT%H:%M:%S%.3f"),
                record.level(),
                record.module_path().unwrap_or(""),
                record.args()
            )
        })
        .write_style(env_logger::WriteStyle::Never)
        .init();

    axpert_bridge::app(config).await
}
