/// Runtime configuration.
///
/// Every property is reachable by name through config("name") and
/// config("name", value), which is also what the GETCONFIG / SETCONFIG
/// opcodes execute. config("all") snapshots the whole structure into a
/// config-state value; assigning such a snapshot back restores it.

use crate::core::number::{Number, OutMode};
use crate::core::value::{Kind, Value};
use crate::errors::ExecError;
use num_bigint::BigInt;

// Trace flag bits.
pub const TRACE_FNCODES: u32 = 0x1; // disassemble functions as they commit
pub const TRACE_NODEBUG: u32 = 0x2; // suppress DEBUG opcodes entirely

#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    /// Output mode for numbers: exact fractions or decimal expansions.
    pub outmode: OutMode,
    /// Decimal digits printed in real mode.
    pub display: u32,
    /// Error bound for approximation builtins.
    pub epsilon: Number,
    /// Scan errors tolerated before compilation is abandoned.
    pub maxscancount: u32,
    /// Warn when a global or local is redeclared at the same scope.
    pub redecl_warn: bool,
    /// Warn when one name is declared with two different scopes.
    pub dupvar_warn: bool,
    /// Debug levels (the -D flag sets all three).
    pub calc_debug: i64,
    pub resource_debug: i64,
    pub user_debug: i64,
    /// Trace flag bits, see TRACE_*.
    pub traceflags: u32,
    /// Allow ~ expansion in read paths.
    pub tilde_ok: bool,
    /// Stop at the first error even under -c.
    pub stoponerror: bool,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            outmode: OutMode::Real,
            display: 20,
            epsilon: Number::new(
                BigInt::from(1),
                num_traits::Pow::pow(&BigInt::from(10), 20u32),
            )
            .expect("epsilon constant"),
            maxscancount: 20,
            redecl_warn: true,
            dupvar_warn: true,
            calc_debug: 0,
            resource_debug: 0,
            user_debug: 0,
            traceflags: 0,
            tilde_ok: true,
            stoponerror: false,
        }
    }
}

impl Config {
    /// The -O preset: legacy defaults, quieter about declarations.
    pub fn classic() -> Self {
        Config {
            redecl_warn: false,
            dupvar_warn: false,
            ..Config::default()
        }
    }

    pub fn get(&self, name: &str) -> Result<Value, ExecError> {
        Ok(match name {
            "mode" => Value::string(match self.outmode {
                OutMode::Real => "real",
                OutMode::Frac => "frac",
            }),
            "display" => Value::int(self.display as i64),
            "epsilon" => Value::num(self.epsilon.clone()),
            "maxscancount" => Value::int(self.maxscancount as i64),
            "redecl_warn" => Value::int(self.redecl_warn as i64),
            "dupvar_warn" => Value::int(self.dupvar_warn as i64),
            "calc_debug" => Value::int(self.calc_debug),
            "resource_debug" => Value::int(self.resource_debug),
            "user_debug" => Value::int(self.user_debug),
            "trace" => Value::int(self.traceflags as i64),
            "tilde" => Value::int(self.tilde_ok as i64),
            "stoponerror" => Value::int(self.stoponerror as i64),
            _ => {
                return Err(ExecError::domain(format!(
                    "unknown config parameter \"{}\"",
                    name
                )))
            }
        })
    }

    pub fn set(&mut self, name: &str, value: &Value) -> Result<(), ExecError> {
        match name {
            "mode" => {
                let s = match &value.kind {
                    Kind::Str(s) => s.clone(),
                    _ => return Err(ExecError::typ("config mode must be a string")),
                };
                self.outmode = match &*s {
                    "real" => OutMode::Real,
                    "frac" | "fraction" => OutMode::Frac,
                    other => {
                        return Err(ExecError::domain(format!(
                            "unknown output mode \"{}\"",
                            other
                        )))
                    }
                };
            }
            "display" => self.display = Self::as_u32(value, "display")?,
            "epsilon" => {
                let eps = value
                    .as_number()
                    .ok_or_else(|| ExecError::typ("epsilon must be a number"))?;
                if !eps.is_negative() && !eps.is_zero() {
                    self.epsilon = eps;
                } else {
                    return Err(ExecError::domain("epsilon must be positive"));
                }
            }
            "maxscancount" => self.maxscancount = Self::as_u32(value, "maxscancount")?,
            "redecl_warn" => self.redecl_warn = value.test(),
            "dupvar_warn" => self.dupvar_warn = value.test(),
            "calc_debug" => self.calc_debug = Self::as_i64(value, "calc_debug")?,
            "resource_debug" => self.resource_debug = Self::as_i64(value, "resource_debug")?,
            "user_debug" => self.user_debug = Self::as_i64(value, "user_debug")?,
            "trace" => self.traceflags = Self::as_u32(value, "trace")?,
            "tilde" => self.tilde_ok = value.test(),
            "stoponerror" => self.stoponerror = value.test(),
            _ => {
                return Err(ExecError::domain(format!(
                    "unknown config parameter \"{}\"",
                    name
                )))
            }
        }
        Ok(())
    }

    fn as_i64(value: &Value, what: &str) -> Result<i64, ExecError> {
        value
            .as_index()
            .ok_or_else(|| ExecError::typ(format!("config {} must be an integer", what)))
    }

    fn as_u32(value: &Value, what: &str) -> Result<u32, ExecError> {
        let n = Self::as_i64(value, what)?;
        u32::try_from(n)
            .map_err(|_| ExecError::domain(format!("config {} out of range", what)))
    }
}

/// Property names and one-line documentation, for `show config`.
pub const PROPERTIES: &[(&str, &str)] = &[
    ("mode", "number output mode: real or frac"),
    ("display", "decimal digits printed in real mode"),
    ("epsilon", "error bound for approximation builtins"),
    ("maxscancount", "scan errors tolerated before giving up"),
    ("redecl_warn", "warn on same-scope redeclaration"),
    ("dupvar_warn", "warn when one name spans two scopes"),
    ("calc_debug", "internal debug level"),
    ("resource_debug", "resource file debug level"),
    ("user_debug", "user script debug level"),
    ("trace", "trace flag bits (1 = dump opcodes on define)"),
    ("tilde", "allow ~ expansion in read paths"),
    ("stoponerror", "stop at the first error even under -c"),
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn get_set_round_trip() {
        let mut c = Config::default();
        c.set("display", &Value::int(9)).unwrap();
        assert!(matches!(c.get("display").unwrap().kind, Kind::Int(9)));
        c.set("mode", &Value::string("frac")).unwrap();
        assert_eq!(c.outmode, OutMode::Frac);
        assert!(c.set("display", &Value::string("x")).is_err());
        assert!(c.get("nosuch").is_err());
    }
}
