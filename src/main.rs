use std::io;

use actix_cors::Cors;
use actix_web::{web, App, HttpServer};
use clap::Parser;
use tracing::info;

use stress_bench::config::Config;
use stress_bench::logger::logger_init;
use stress_bench::{handlers, CpuController, MemoryController, VERSION};

#[tokio::main]
async fn main() -> io::Result<()> {
    let config = Config::parse();
    config.validate().map_err(io::Error::other)?;
    logger_init(&config.logger_config()).map_err(io::Error::other)?;

    let cpu = web::Data::new(CpuController::new(config.cpu_settings()));
    let memory = web::Data::new(MemoryController::new(config.memory_settings()));

    let (host, port) = config.bind_addr();
    info!(
        version = VERSION,
        %host,
        port,
        cores = cpu.available_cores(),
        "starting CPU-RAM benchmark server"
    );

    let server = {
        let cpu = cpu.clone();
        let memory = memory.clone();
        HttpServer::new(move || {
            App::new()
                .wrap(Cors::permissive())
                .app_data(cpu.clone())
                .app_data(memory.clone())
                .configure(handlers::configure)
        })
    };
    server.bind((host, port))?.run().await?;

    // Join whatever is still running so workers never outlive the server.
    let stopped_cpu = cpu.stop();
    let stopped_memory = memory.stop();
    let released = memory.free();
    info!(stopped_cpu, stopped_memory, released_mib = released, "server shut down");
    Ok(())
}
