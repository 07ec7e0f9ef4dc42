use serde_json::Value;

use crate::cmd::CallArgs;
use crate::exit::{rpc_error, CliError, CliResult, SUCCESS, USAGE};
use crate::output::{print_value, OutputFormat};

pub fn run(args: CallArgs, format: OutputFormat) -> CliResult<i32> {
    let params = resolve_params(args.params.as_deref())?;

    let proxy = wirebus_rpc::connect(&args.path, &args.service)
        .map_err(|err| rpc_error("connect failed", err))?;

    if args.notify {
        proxy
            .notify(&args.method, params)
            .map_err(|err| rpc_error("notify failed", err))?;
        proxy.close();
        return Ok(SUCCESS);
    }

    let result = proxy
        .call(&args.method, params)
        .map_err(|err| rpc_error("call failed", err))?;
    print_value(&result, format);
    proxy.close();

    Ok(SUCCESS)
}

fn resolve_params(params: Option<&str>) -> CliResult<Value> {
    match params {
        Some(json) => serde_json::from_str(json)
            .map_err(|err| CliError::new(USAGE, format!("--params is not valid JSON: {err}"))),
        None => Ok(Value::Null),
    }
}
