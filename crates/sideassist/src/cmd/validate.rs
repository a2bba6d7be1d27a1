use serde_json::Value;

use crate::cmd::{load_rule, parse_json, ValidateArgs};
use crate::exit::{CliResult, FAILURE, SUCCESS};
use crate::output::{print_verdicts, OutputFormat};

pub fn run(args: ValidateArgs, format: OutputFormat) -> CliResult<i32> {
    let rule = load_rule(&args.rule, args.skip_invalid_children)?;
    let values = args
        .values
        .iter()
        .map(|text| parse_json("value", text))
        .collect::<CliResult<Vec<Value>>>()?;

    let verdicts: Vec<(Value, bool)> = values
        .into_iter()
        .map(|value| {
            let accepted = rule.validate(&value);
            (value, accepted)
        })
        .collect();
    print_verdicts(&rule.to_json(), &verdicts, format);

    if verdicts.iter().all(|(_, accepted)| *accepted) {
        Ok(SUCCESS)
    } else {
        Ok(FAILURE)
    }
}
