use std::fmt::Write;

use actix_web::{web, HttpResponse};
use tracing::info;

use crate::cpu_stress::CpuController;
use crate::error::ApiError;
use crate::memory_stress::{percent, MemoryController, MAX_LIMIT_MIB};
use crate::sys_info;
use crate::VERSION;

type HandlerResult = Result<HttpResponse, ApiError>;

/// Mounts every route. Expects `web::Data<CpuController>` and
/// `web::Data<MemoryController>` to be registered as app data.
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(web::resource("/").route(web::get().to(hello)))
        .service(web::resource("/health").route(web::get().to(health)))
        .service(web::resource("/version").route(web::get().to(version)))
        .service(web::resource("/status").route(web::get().to(status)))
        .service(web::resource("/cpu/activate").route(web::post().to(activate_cpu_all)))
        .service(web::resource("/cpu/activate/{cores}").route(web::post().to(activate_cpu_with)))
        .service(web::resource("/cpu/deactivate").route(web::post().to(deactivate_cpu)))
        .service(web::resource("/memory/activate").route(web::post().to(activate_memory_default)))
        .service(web::resource("/memory/activate/{limit}").route(web::post().to(activate_memory_with)))
        .service(web::resource("/memory/deactivate").route(web::post().to(deactivate_memory)))
        .service(web::resource("/memory/free").route(web::post().to(free_memory)))
        // legacy aliases
        .service(web::resource("/activate").route(web::post().to(activate_cpu_all)))
        .service(web::resource("/deactivate").route(web::post().to(deactivate_cpu)));
}

fn text(body: String) -> HttpResponse {
    HttpResponse::Ok()
        .content_type("text/plain; charset=utf-8")
        .body(body)
}

fn parse_positive(raw: &str, invalid: &'static str) -> Result<i64, ApiError> {
    raw.parse::<i64>()
        .ok()
        .filter(|n| *n > 0)
        .ok_or(ApiError::BadRequest(invalid))
}

async fn hello() -> HttpResponse {
    text("Hello, World!".to_string())
}

async fn health() -> HttpResponse {
    text("Server is up and running!".to_string())
}

async fn version() -> HttpResponse {
    text(format!("CPU-RAM Benchmark Server Version: {VERSION}\n"))
}

async fn activate_cpu_all(cpu: web::Data<CpuController>) -> HandlerResult {
    start_cpu(&cpu, 0)
}

async fn activate_cpu_with(cpu: web::Data<CpuController>, path: web::Path<String>) -> HandlerResult {
    let cores = parse_positive(&path, "Invalid core count")?;
    start_cpu(&cpu, cores)
}

fn start_cpu(cpu: &CpuController, cores: i64) -> HandlerResult {
    if !cpu.start(cores)? {
        return Err(ApiError::Conflict("CPU benchmark task is already running"));
    }
    info!(requested = cores, cores = cpu.cores_in_use(), "cpu benchmark activated");
    Ok(text(format!(
        "CPU benchmark task activated successfully using {} cores",
        cpu.cores_in_use()
    )))
}

async fn deactivate_cpu(cpu: web::Data<CpuController>) -> HandlerResult {
    let cpu = cpu.into_inner();
    if !web::block(move || cpu.stop()).await? {
        return Err(ApiError::Conflict("No CPU benchmark task is currently running"));
    }
    Ok(text("CPU benchmark task deactivated successfully".to_string()))
}

async fn activate_memory_default(memory: web::Data<MemoryController>) -> HandlerResult {
    start_memory(&memory, 0)
}

async fn activate_memory_with(
    memory: web::Data<MemoryController>,
    path: web::Path<String>,
) -> HandlerResult {
    let limit = parse_positive(&path, "Invalid memory limit")?;
    if usize::try_from(limit).map_or(true, |mib| mib > MAX_LIMIT_MIB) {
        return Err(ApiError::BadRequest("Invalid memory limit"));
    }
    start_memory(&memory, limit)
}

fn start_memory(memory: &MemoryController, limit: i64) -> HandlerResult {
    if !memory.start(limit)? {
        return Err(ApiError::Conflict("Memory benchmark task is already running"));
    }
    Ok(text(format!(
        "Memory benchmark task activated successfully with {} MB limit",
        memory.limit_mib()
    )))
}

async fn deactivate_memory(memory: web::Data<MemoryController>) -> HandlerResult {
    let memory = memory.into_inner();
    let stopped = web::block({
        let memory = memory.clone();
        move || memory.stop()
    })
    .await?;
    if !stopped {
        return Err(ApiError::Conflict("No memory benchmark task is currently running"));
    }
    Ok(text(format!(
        "Memory benchmark task deactivated successfully. {} MB still allocated - use /memory/free to release.",
        memory.allocated_mib()
    )))
}

async fn free_memory(memory: web::Data<MemoryController>) -> HandlerResult {
    let memory = memory.into_inner();
    let released = web::block(move || memory.free()).await?;
    Ok(text(format!(
        "Forced memory cleanup completed. {released} MB has been released back to the system."
    )))
}

async fn status(cpu: web::Data<CpuController>, memory: web::Data<MemoryController>) -> HandlerResult {
    let cpu = cpu.into_inner();
    let memory = memory.into_inner();
    // sysinfo refreshes synchronously
    let body = web::block(move || render_status(&cpu, &memory)).await?;
    Ok(text(body))
}

fn state_text(active: bool) -> &'static str {
    if active {
        "RUNNING"
    } else {
        "STOPPED"
    }
}

/// Plain-text status page. Memory details are shown whenever blocks are
/// held, even after the task stopped.
pub fn render_status(cpu: &CpuController, memory: &MemoryController) -> String {
    let mut out = String::new();
    let cpu_active = cpu.is_running();
    let memory_active = memory.is_running();

    let _ = writeln!(out, "Benchmark Status (Version: {VERSION}):");
    let _ = write!(out, "- CPU Benchmark: {}", state_text(cpu_active));
    if cpu_active {
        let _ = write!(out, " (using {} cores)", cpu.cores_in_use());
    }
    out.push('\n');

    let allocated = memory.allocated_mib();
    let _ = write!(out, "- Memory Benchmark: {}", state_text(memory_active));
    if allocated > 0 {
        if memory_active {
            let limit = memory.limit_mib();
            let _ = write!(
                out,
                " (using {allocated} MB of {limit} MB limit - {}%)",
                percent(allocated, limit)
            );
        } else {
            let _ = write!(out, " (stopped, but still holding {allocated} MB of memory)");
        }
    }
    out.push('\n');

    let system = sys_info::memory_snapshot();
    let _ = writeln!(
        out,
        "- System Memory: used {} MB of {} MB",
        system.used_mib, system.total_mib
    );
    out
}
