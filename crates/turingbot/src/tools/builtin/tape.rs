//! Tape tools: read, write and navigate the 3D spatial store

use serde_json::{json, Value};

use crate::error::ToolError;
use crate::tools::{required_str, ParameterProperty, ParameterSchema, SecurityLevel, Tool, ToolContext};

const DIRECTIONS: &[&str] = &[
    "+x", "-x", "+y", "-y", "+z", "-z", "right", "left", "up", "down", "forward", "backward", "back",
];

/// Integer coordinate from an integer, a float (truncated toward zero) or an integer string
fn coordinate(args: &Value, field: &'static str) -> Result<i64, ToolError> {
    match args.get(field) {
        None | Some(Value::Null) => Err(ToolError::missing(field)),
        Some(Value::Number(n)) => {
            if let Some(i) = n.as_i64() {
                return Ok(i);
            }
            let f = n.as_f64().unwrap_or(f64::NAN).trunc();
            if f.is_finite() && f >= i64::MIN as f64 && f <= i64::MAX as f64 {
                Ok(f as i64)
            } else {
                Err(ToolError::InvalidArgument(format!(
                    "'{}' is out of range: {}",
                    field, n
                )))
            }
        }
        Some(Value::String(s)) => s.trim().parse::<i64>().map_err(|_| {
            ToolError::InvalidArgument(format!("'{}' is not an integer: '{}'", field, s))
        }),
        Some(other) => Err(ToolError::type_mismatch(field, "an integer", other)),
    }
}

pub struct TapeReadTool;

impl Tool for TapeReadTool {
    fn name(&self) -> &str {
        "tape_read"
    }

    fn description(&self) -> &str {
        "Read the value at the current cursor position"
    }

    fn security_level(&self) -> SecurityLevel {
        SecurityLevel::Safe
    }

    fn parameters_schema(&self) -> ParameterSchema {
        ParameterSchema::new()
    }

    fn execute(&self, _args: &Value, ctx: &mut ToolContext<'_>) -> Result<String, ToolError> {
        let value = ctx.spatial.read();
        Ok(if value.is_empty() {
            "Cell is empty".to_string()
        } else {
            format!("Cell value: '{}'", value)
        })
    }
}

pub struct TapeWriteTool;

impl Tool for TapeWriteTool {
    fn name(&self) -> &str {
        "tape_write"
    }

    fn description(&self) -> &str {
        "Write a string value at the current cursor position. An empty string erases the cell."
    }

    fn security_level(&self) -> SecurityLevel {
        SecurityLevel::Moderate
    }

    fn parameters_schema(&self) -> ParameterSchema {
        ParameterSchema::new()
            .with_required("value", ParameterProperty::string("The value to write to the current cell"))
    }

    fn execute(&self, args: &Value, ctx: &mut ToolContext<'_>) -> Result<String, ToolError> {
        let value = required_str(args, "value")?;
        Ok(ctx.spatial.write(value))
    }
}

pub struct TapeMoveTool;

impl Tool for TapeMoveTool {
    fn name(&self) -> &str {
        "tape_move"
    }

    fn description(&self) -> &str {
        "Move the cursor one step: +x, -x, +y, -y, +z, -z (or right/left/up/down/forward/backward)"
    }

    fn security_level(&self) -> SecurityLevel {
        SecurityLevel::Moderate
    }

    fn parameters_schema(&self) -> ParameterSchema {
        ParameterSchema::new().with_required(
            "direction",
            ParameterProperty::string("Direction to move").with_enum(DIRECTIONS),
        )
    }

    fn execute(&self, args: &Value, ctx: &mut ToolContext<'_>) -> Result<String, ToolError> {
        let direction = required_str(args, "direction")?;
        let cursor = ctx.spatial.move_cursor(direction)?;
        Ok(format!("Moved {} → cursor now at {}", direction.trim(), cursor))
    }
}

pub struct TapeJumpTool;

impl Tool for TapeJumpTool {
    fn name(&self) -> &str {
        "tape_jump"
    }

    fn description(&self) -> &str {
        "Jump the cursor to an arbitrary (x, y, z) coordinate"
    }

    fn security_level(&self) -> SecurityLevel {
        SecurityLevel::Moderate
    }

    fn parameters_schema(&self) -> ParameterSchema {
        ParameterSchema::new()
            .with_required("x", ParameterProperty::integer("X coordinate"))
            .with_required("y", ParameterProperty::integer("Y coordinate"))
            .with_required("z", ParameterProperty::integer("Z coordinate"))
    }

    fn execute(&self, args: &Value, ctx: &mut ToolContext<'_>) -> Result<String, ToolError> {
        let x = coordinate(args, "x")?;
        let y = coordinate(args, "y")?;
        let z = coordinate(args, "z")?;
        let cursor = ctx.spatial.jump(x, y, z);
        Ok(format!("Jumped to {}", cursor))
    }
}

pub struct TapeScanTool;

impl Tool for TapeScanTool {
    fn name(&self) -> &str {
        "tape_scan"
    }

    fn description(&self) -> &str {
        "Read all non-empty cells within a radius of the cursor"
    }

    fn security_level(&self) -> SecurityLevel {
        SecurityLevel::Safe
    }

    fn parameters_schema(&self) -> ParameterSchema {
        ParameterSchema::new().with_property(
            "radius",
            ParameterProperty::integer("Scan radius (default 1)").with_default(json!(1)),
        )
    }

    fn execute(&self, args: &Value, ctx: &mut ToolContext<'_>) -> Result<String, ToolError> {
        let radius = match args.get("radius") {
            None | Some(Value::Null) => 1,
            Some(_) => coordinate(args, "radius")?,
        };
        let cells = ctx.spatial.scan(radius)?;
        if cells.is_empty() {
            return Ok("No written cells in scan radius".to_string());
        }
        serde_json::to_string_pretty(&cells)
            .map_err(|e| ToolError::InvalidArgument(e.to_string()))
    }
}

pub struct TapeStatusTool;

impl Tool for TapeStatusTool {
    fn name(&self) -> &str {
        "tape_status"
    }

    fn description(&self) -> &str {
        "Get the current cursor position and tape statistics"
    }

    fn security_level(&self) -> SecurityLevel {
        SecurityLevel::Safe
    }

    fn parameters_schema(&self) -> ParameterSchema {
        ParameterSchema::new()
    }

    fn execute(&self, _args: &Value, ctx: &mut ToolContext<'_>) -> Result<String, ToolError> {
        Ok(ctx.spatial.status())
    }
}
