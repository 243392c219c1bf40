use greybus_core::GreybusConfig;

use crate::cmd::ConfigArgs;
use crate::exit::{greybus_error, CliResult, SUCCESS};
use crate::output::{print_config, OutputFormat};

pub fn run(args: ConfigArgs, format: OutputFormat) -> CliResult<i32> {
    let config = GreybusConfig::load(&args.path).map_err(|err| {
        greybus_error(&format!("failed loading {}", args.path.display()), err)
    })?;
    print_config(&config, format);
    Ok(SUCCESS)
}
