use cardio_risk::config::{Cli, Command, PredictArgs, ServeArgs, TrainArgs};
use cardio_risk::loader::{load_infer, load_train, train_test_split};
use cardio_risk::pipeline::{PredictionReport, ScoringPipeline};
use cardio_risk::records::ColumnGroups;
use cardio_risk::server::build_router;
use cardio_risk::Result;
use clap::Parser;
use env_logger::{Builder, Env};
use log::{debug, info, LevelFilter};
use std::fs::File;
use std::sync::Arc;
use std::time::Instant;
use sysinfo::{get_current_pid, ProcessExt, System, SystemExt};

/// Resident memory of this process in bytes, 0 when it cannot be read.
fn monitor_memory() -> u64 {
    let Ok(pid) = get_current_pid() else {
        return 0;
    };
    let mut system = System::new();
    system.refresh_process(pid);
    system.process(pid).map(|p| p.memory()).unwrap_or(0)
}

async fn serve(args: ServeArgs) -> Result<()> {
    let start_time = Instant::now();
    let start_memory = monitor_memory();

    let (features, labels) = load_train(&args.training.train_file)?;
    let pipeline = match &args.model {
        Some(path) => ScoringPipeline::with_saved_classifier(&features, ColumnGroups::default(), path)?,
        None => ScoringPipeline::train(
            &features,
            &labels,
            ColumnGroups::default(),
            args.training.forest_parameters(),
        )?,
    };

    let end_memory = monitor_memory();
    info!(
        "model ready in {:?}, memory used: {} KiB",
        start_time.elapsed(),
        end_memory.saturating_sub(start_memory) / 1024
    );

    let app = build_router(Arc::new(pipeline), args.max_upload_bytes);
    let listener = tokio::net::TcpListener::bind(&args.listen).await?;
    info!("listening on {}", args.listen);
    axum::serve(listener, app).await?;

    Ok(())
}

async fn train(args: TrainArgs) -> Result<()> {
    let (features, labels) = load_train(&args.training.train_file)?;
    let (x_train, x_test, y_train, y_test) =
        train_test_split(&features, &labels, args.holdout, args.training.seed)?;
    info!("{} training rows, {} holdout rows", y_train.len(), y_test.len());

    let pipeline = ScoringPipeline::train(
        &x_train,
        &y_train,
        ColumnGroups::default(),
        args.training.forest_parameters(),
    )?;
    let metrics = pipeline.evaluate(&x_test, &y_test)?;
    info!("holdout {}", metrics);
    debug!("holdout confusion {:?}", metrics.confusion);
    println!("{}", serde_json::to_string_pretty(&metrics)?);

    if let Some(path) = &args.save {
        pipeline.classifier().save(path)?;
    }
    Ok(())
}

async fn predict(args: PredictArgs) -> Result<()> {
    let (features, labels) = load_train(&args.training.train_file)?;
    let pipeline = ScoringPipeline::train(
        &features,
        &labels,
        ColumnGroups::default(),
        args.training.forest_parameters(),
    )?;

    let table = load_infer(&args.input)?;
    let report = PredictionReport::from_predictions(&pipeline.predict(&table)?);

    let mut writer = csv::Writer::from_writer(File::create(&args.output)?);
    for row in &report.predictions {
        writer.serialize(row)?;
    }
    writer.flush()?;
    info!(
        "wrote {} predictions ({} at risk) to {}",
        report.total_patients,
        report.patients_with_risk,
        args.output.display()
    );
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_level = match cli.verbose {
        0 => LevelFilter::Info,
        1 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    };

    let env = Env::new().filter("CARDIO_LOG");
    Builder::new()
        .filter(Some("cardio_risk"), log_level)
        .parse_env(env)
        .init();

    debug!("Arguments {:#?}", cli);

    match cli.command {
        Command::Serve(args) => serve(args).await,
        Command::Train(args) => train(args).await,
        Command::Predict(args) => predict(args).await,
    }
}
