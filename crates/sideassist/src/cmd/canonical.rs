use crate::cmd::{load_rule, CanonicalArgs};
use crate::exit::{CliResult, SUCCESS};
use crate::output::{print_json, OutputFormat};

pub fn run(args: CanonicalArgs, format: OutputFormat) -> CliResult<i32> {
    let rule = load_rule(&args.rule, args.skip_invalid_children)?;
    print_json(&rule.to_json(), format);
    Ok(SUCCESS)
}
