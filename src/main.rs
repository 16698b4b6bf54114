use clap::Parser;
use s3_upload::utils::logger;
use s3_upload::{AwsS3Client, CliConfig, S3UploadStream, UploadError};
use std::fs::File;
use std::io::{self, Read};
use std::sync::Arc;

fn exit_code(error: &UploadError) -> i32 {
    if error.is_config_error() {
        1
    } else if error.is_retryable() {
        2
    } else {
        3
    }
}

fn fail(error: &UploadError) -> ! {
    tracing::error!("❌ Upload failed: {}", error);
    tracing::error!("💡 Recovery suggestion: {}", error.recovery_suggestion());
    eprintln!("❌ {}", error);
    eprintln!("💡 {}", error.recovery_suggestion());
    std::process::exit(exit_code(error));
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = CliConfig::parse();

    logger::init_logger(cli.verbose, cli.log_json);

    tracing::info!("Starting s3-upload");
    if cli.verbose {
        tracing::debug!("CLI config: {:?}", cli);
    }

    let resolved = match cli.resolve() {
        Ok(resolved) => resolved,
        Err(e) => fail(&e),
    };

    let client = Arc::new(AwsS3Client::connect(&resolved.s3).await);
    let mut stream =
        match S3UploadStream::new(client, resolved.target.clone(), resolved.upload.clone()) {
            Ok(stream) => stream,
            Err(e) => fail(&e),
        };

    let mut reader: Box<dyn Read + Send> = match &resolved.source {
        Some(path) => match File::open(path) {
            Ok(file) => Box::new(file),
            Err(e) => fail(&UploadError::ConfigError {
                message: format!("Cannot open {}: {}", path.display(), e),
            }),
        },
        None => Box::new(io::stdin()),
    };

    // reading blocks, so keep it off the async workers; the stream comes back
    // either way so a failed copy can still abort the upload
    let (stream, copied) = tokio::task::spawn_blocking(move || {
        let copied = io::copy(&mut reader, &mut stream);
        (stream, copied)
    })
    .await?;

    let copied = match copied {
        Ok(copied) => copied,
        Err(e) => {
            let error = UploadError::from(e);
            stream.abort().await;
            fail(&error);
        }
    };
    tracing::info!("Read {} bytes, waiting for upload to finish", copied);

    match stream.finish().await {
        Ok(outcome) => {
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&outcome)?);
            } else {
                println!("✅ Uploaded {} bytes to {}", outcome.total_bytes, resolved.target.uri());
                if let Some(e_tag) = &outcome.e_tag {
                    println!("🏷️  ETag: {}", e_tag);
                }
            }
        }
        Err(e) => fail(&e),
    }

    Ok(())
}
