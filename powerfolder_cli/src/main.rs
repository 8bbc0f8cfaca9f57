use anyhow::anyhow;
use clap::Parser;
use log::*;
use powerfolder_cli::config::{CallCommand, CliCommand, Config, EchoCommand, GlobalOptions};
use powerfolder_cli::folder_service::FolderError;
use powerfolder_cli::session::Session;
use powerfolder_cli::settings::{default_config_path, Settings};

#[tokio::main]
async fn main() {
    env_logger::init();
    let config: Config = Config::parse();
    let (global_options, command) = config.to_parts();

    let result = match command {
        CliCommand::Echo(echo_command) => exec_echo(echo_command, global_options).await,
        CliCommand::Call(call_command) => exec_call(call_command, global_options).await,
        CliCommand::Init => exec_init(global_options),
    };

    match result {
        Ok(()) => {
            println!("Bye :)")
        }
        Err(err) => {
            eprintln!("** Error ** \n {err}");
            std::process::exit(1);
        }
    }
}

fn load_settings(options: &GlobalOptions) -> Result<Settings, anyhow::Error> {
    let path = options.config_file.clone().unwrap_or_else(default_config_path);
    info!("Loading configuration from {}", path.display());
    let settings = Settings::load_or_default(&path)?;
    Ok(settings.with_timeout(options.timeout))
}

fn exec_init(options: GlobalOptions) -> Result<(), anyhow::Error> {
    let path = options.config_file.clone().unwrap_or_else(default_config_path);
    if path.exists() {
        return Err(anyhow!("{} already exists.", path.display()));
    }
    let settings = Settings::default().with_timeout(options.timeout);
    settings.save(&path)?;
    println!("Configuration written to {}", path.display());
    Ok(())
}

async fn exec_echo(cmd: EchoCommand, options: GlobalOptions) -> Result<(), anyhow::Error> {
    if cmd.count == 0 {
        return Err(anyhow!("Nothing to do: --count must be at least 1."));
    }
    let settings = load_settings(&options)?;
    let session = Session::start(&settings);
    let result = session.echo_chain(cmd.count, &cmd.payload).await;
    session.close().await;
    let last = result?;
    println!("{} echo requests answered correctly. The last payload was {} bytes long.", cmd.count, last.len());
    Ok(())
}

async fn exec_call(cmd: CallCommand, options: GlobalOptions) -> Result<(), anyhow::Error> {
    let settings = load_settings(&options)?;
    let session = Session::start(&settings);
    let result = call_folder_service(&session, &cmd).await;
    session.close().await;
    result
}

async fn call_folder_service(session: &Session, cmd: &CallCommand) -> Result<(), anyhow::Error> {
    let folders = session.folder_service();
    println!("{}", folders.greet(&cmd.name).await?);
    let Some(folder) = &cmd.folder else {
        println!("Shared folders: {}", folders.list_folders().await?.join(", "));
        return Ok(());
    };
    match folders.list_files(folder).await {
        Ok(files) if files.is_empty() => println!("{folder} is empty."),
        Ok(files) => {
            println!("{folder}:");
            for file in files {
                println!("  {file}");
            }
        }
        Err(FolderError::NoSuchFolder(missing)) => println!("{missing}"),
        Err(err) => return Err(err.into()),
    }
    Ok(())
}
