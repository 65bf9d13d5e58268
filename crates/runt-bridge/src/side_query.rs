//! Side queries: requests against kernel state that never touch the queue.
//!
//! Variables, dataframe previews, peeks and clipboard text are produced by
//! small helper programs run silently in the kernel. Each helper publishes a
//! single display payload under a bridge-specific MIME type, which is decoded
//! here into an editor event. Helpers swallow their own failures: a missing
//! variable or an unsupported type simply yields no payload.
//!
//! Inspection goes through the kernel's own introspection request instead.

use std::path::Path;

use serde_json::Value;

use crate::protocol::{Event, Inspection, PlotMode, VariableInfo};
use crate::traceback::strip_ansi;
use crate::transport::MimeBundle;

const VARIABLES_MIME: &str = "application/vnd.jovian.variables+json";
const DATAFRAME_MIME: &str = "application/vnd.jovian.dataframe+json";
const PEEK_MIME: &str = "application/vnd.jovian.peek+json";
const CLIPBOARD_MIME: &str = "application/vnd.jovian.clipboard+json";

/// Placeholder in helper templates replaced by the quoted target name.
const TARGET: &str = "__JOVIAN_TARGET__";

const VARIABLES_HELPER: &str = r#"def __jovian_helper(_unused):
    import types
    from IPython import get_ipython
    from IPython.display import display
    ns = get_ipython().user_ns
    hidden = ("In", "Out", "exit", "quit", "get_ipython")
    out = []
    for name, value in list(ns.items()):
        if name.startswith("_") or name in hidden:
            continue
        if isinstance(value, (types.ModuleType, types.FunctionType, type)):
            continue
        type_name = type(value).__name__
        try:
            if hasattr(value, "shape"):
                shape = str(value.shape).replace(" ", "")
                detail = str(value.dtype) if hasattr(value, "dtype") else type_name
                info = shape + " | " + detail
            elif isinstance(value, (list, dict, set, tuple)):
                info = "len: " + str(len(value))
            else:
                info = str(value).replace("\n", " ")
                if len(info) > 200:
                    info = info[:197] + "..."
        except Exception:
            info = ""
        out.append({"name": name, "type": type_name, "info": info})
    out.sort(key=lambda v: v["name"])
    display({"application/vnd.jovian.variables+json": {"variables": out}}, raw=True)
"#;

const DATAFRAME_HELPER: &str = r#"def __jovian_helper(name):
    import json
    from IPython import get_ipython
    from IPython.display import display
    ns = get_ipython().user_ns
    if name not in ns:
        return
    value = ns[name]
    import pandas as pd
    if isinstance(value, pd.DataFrame):
        df = value
    elif isinstance(value, pd.Series):
        df = value.to_frame()
    else:
        import numpy as np
        if not isinstance(value, np.ndarray) or value.ndim > 2:
            return
        df = pd.DataFrame(value)
    parsed = json.loads(df.head(100).to_json(orient="split", date_format="iso"))
    display({"application/vnd.jovian.dataframe+json": {
        "name": name,
        "columns": parsed.get("columns", []),
        "index": parsed.get("index", []),
        "data": parsed.get("data", []),
    }}, raw=True)
"#;

const PEEK_HELPER: &str = r#"def __jovian_helper(name):
    import sys
    from IPython import get_ipython
    from IPython.display import display
    ns = get_ipython().user_ns
    if name not in ns:
        return
    value = ns[name]
    size = "unknown"
    try:
        n = sys.getsizeof(value)
        if n < 1024:
            size = "%d B" % n
        elif n < 1024 ** 2:
            size = "%.1f KB" % (n / 1024)
        else:
            size = "%.1f MB" % (n / 1024 ** 2)
    except Exception:
        pass
    text = repr(value)
    if len(text) > 500:
        text = text[:497] + "..."
    shape = str(value.shape) if hasattr(value, "shape") else ""
    display({"application/vnd.jovian.peek+json": {
        "name": name,
        "type": type(value).__name__,
        "size": size,
        "repr": text,
        "shape": shape,
    }}, raw=True)
"#;

const CLIPBOARD_HELPER: &str = r#"def __jovian_helper(name):
    from IPython import get_ipython
    from IPython.display import display
    ns = get_ipython().user_ns
    if name not in ns:
        return
    value = ns[name]
    text = None
    try:
        import pandas as pd
        if isinstance(value, (pd.DataFrame, pd.Series)):
            try:
                text = value.to_markdown()
            except ImportError:
                text = value.to_csv(sep="\t")
    except ImportError:
        pass
    if text is None:
        try:
            import numpy as np
            if isinstance(value, np.ndarray):
                text = np.array2string(value, separator=", ")
        except ImportError:
            pass
    if text is None:
        text = str(value)
    display({"application/vnd.jovian.clipboard+json": {"content": text}}, raw=True)
"#;

const HELPER_CALL: &str = r#"try:
    __jovian_helper(__JOVIAN_TARGET__)
except Exception:
    pass
finally:
    del __jovian_helper
"#;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SideQueryKind {
    Variables,
    Dataframe,
    Peek,
    Clipboard,
    Inspect,
}

/// An outstanding side query and the variable it targets.
#[derive(Debug, Clone, PartialEq)]
pub struct SideQuery {
    pub kind: SideQueryKind,
    pub target: Option<String>,
}

impl SideQuery {
    pub fn new(kind: SideQueryKind, target: Option<String>) -> Self {
        Self { kind, target }
    }

    /// Inspection replies come back on the request channel; everything else
    /// is a silent execution that finishes with the kernel going idle.
    pub fn ends_on_reply(&self) -> bool {
        self.kind == SideQueryKind::Inspect
    }

    fn target(&self) -> &str {
        self.target.as_deref().unwrap_or_default()
    }

    /// Helper program answering this query, or `None` for inspection.
    pub fn program(&self) -> Option<String> {
        let helper = match self.kind {
            SideQueryKind::Variables => VARIABLES_HELPER,
            SideQueryKind::Dataframe => DATAFRAME_HELPER,
            SideQueryKind::Peek => PEEK_HELPER,
            SideQueryKind::Clipboard => CLIPBOARD_HELPER,
            SideQueryKind::Inspect => return None,
        };
        let call = HELPER_CALL.replace(TARGET, &quote(self.target()));
        Some(format!("{}{}", helper, call))
    }

    fn mime_type(&self) -> Option<&'static str> {
        match self.kind {
            SideQueryKind::Variables => Some(VARIABLES_MIME),
            SideQueryKind::Dataframe => Some(DATAFRAME_MIME),
            SideQueryKind::Peek => Some(PEEK_MIME),
            SideQueryKind::Clipboard => Some(CLIPBOARD_MIME),
            SideQueryKind::Inspect => None,
        }
    }

    /// Decode a helper's display payload. Anything malformed is dropped.
    pub fn decode_display(&self, data: &MimeBundle) -> Option<Event> {
        let payload = data.get(self.mime_type()?)?;
        match self.kind {
            SideQueryKind::Variables => {
                let variables: Vec<VariableInfo> =
                    serde_json::from_value(payload.get("variables")?.clone()).ok()?;
                Some(Event::VariableList { variables })
            }
            SideQueryKind::Dataframe => {
                let field = |key: &str| payload.get(key).cloned().unwrap_or(Value::Array(vec![]));
                let name = payload
                    .get("name")
                    .and_then(Value::as_str)
                    .unwrap_or(self.target())
                    .to_string();
                Some(Event::DataframeData {
                    name,
                    columns: field("columns"),
                    index: field("index"),
                    data: field("data"),
                })
            }
            SideQueryKind::Peek => Some(Event::PeekData {
                data: payload.clone(),
            }),
            SideQueryKind::Clipboard => Some(Event::ClipboardData {
                content: payload.get("content")?.as_str()?.to_string(),
            }),
            SideQueryKind::Inspect => None,
        }
    }

    /// Decode a kernel introspection reply.
    pub fn decode_inspect(&self, found: bool, data: &MimeBundle) -> Option<Event> {
        if self.kind != SideQueryKind::Inspect || !found {
            return None;
        }
        let text = data
            .get("text/plain")
            .and_then(Value::as_str)
            .map(strip_ansi)
            .unwrap_or_default();
        Some(Event::InspectionData {
            data: parse_inspection(self.target(), &text),
        })
    }
}

/// Pull the header fields out of an introspection text.
fn parse_inspection(name: &str, text: &str) -> Inspection {
    let mut inspection = Inspection {
        name: name.to_string(),
        type_name: "unknown".to_string(),
        docstring: if text.trim().is_empty() {
            "No documentation found.".to_string()
        } else {
            text.to_string()
        },
        file: String::new(),
        definition: String::new(),
    };

    for line in text.lines() {
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        let value = value.trim();
        match key.trim() {
            "Type" => inspection.type_name = value.to_string(),
            "File" => inspection.file = value.to_string(),
            "Signature" | "Init signature" | "Definition" if inspection.definition.is_empty() => {
                inspection.definition = value.to_string()
            }
            _ => {}
        }
    }
    inspection
}

/// Silent program switching the kernel's working directory.
pub fn chdir_program(dir: &Path) -> String {
    format!(
        "import os as __jovian_os\n__jovian_os.chdir({})\ndel __jovian_os\n",
        quote(&dir.to_string_lossy())
    )
}

/// Silent program selecting the figure backend.
pub fn plot_mode_program(mode: PlotMode) -> String {
    let backend = match mode {
        PlotMode::Inline => "inline",
        PlotMode::Window => "",
    };
    format!(
        "try:\n    get_ipython().run_line_magic(\"matplotlib\", {})\nexcept Exception:\n    pass\n",
        quote(backend)
    )
}

/// A JSON string literal is also a valid Python string literal.
fn quote(text: &str) -> String {
    Value::String(text.to_string()).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn bundle(value: Value) -> MimeBundle {
        match value {
            Value::Object(map) => map,
            _ => panic!("bundle must be an object"),
        }
    }

    #[test]
    fn test_program_embeds_quoted_target() {
        let query = SideQuery::new(SideQueryKind::Peek, Some("x\"); import os #".into()));
        let program = query.program().unwrap();
        assert!(program.contains(r#"__jovian_helper("x\"); import os #")"#));
        assert!(program.contains("application/vnd.jovian.peek+json"));
        assert!(!program.contains(TARGET));
    }

    #[test]
    fn test_inspect_has_no_program() {
        assert!(SideQuery::new(SideQueryKind::Inspect, Some("len".into()))
            .program()
            .is_none());
    }

    #[test]
    fn test_decode_variables() {
        let query = SideQuery::new(SideQueryKind::Variables, None);
        let data = bundle(json!({
            VARIABLES_MIME: {"variables": [{"name": "x", "type": "int", "info": "42"}]}
        }));
        assert_eq!(
            query.decode_display(&data),
            Some(Event::VariableList {
                variables: vec![VariableInfo {
                    name: "x".into(),
                    type_name: "int".into(),
                    info: "42".into()
                }]
            })
        );
    }

    #[test]
    fn test_decode_dataframe_defaults() {
        let query = SideQuery::new(SideQueryKind::Dataframe, Some("df".into()));
        let data = bundle(json!({ DATAFRAME_MIME: {"columns": ["a"]} }));
        assert_eq!(
            query.decode_display(&data),
            Some(Event::DataframeData {
                name: "df".into(),
                columns: json!(["a"]),
                index: json!([]),
                data: json!([]),
            })
        );
    }

    #[test]
    fn test_decode_ignores_other_payloads() {
        let query = SideQuery::new(SideQueryKind::Clipboard, Some("x".into()));
        assert!(query
            .decode_display(&bundle(json!({"text/plain": "x"})))
            .is_none());
        assert!(query
            .decode_display(&bundle(json!({ PEEK_MIME: {"name": "x"} })))
            .is_none());
        assert_eq!(
            query.decode_display(&bundle(json!({ CLIPBOARD_MIME: {"content": "1, 2"} }))),
            Some(Event::ClipboardData {
                content: "1, 2".into()
            })
        );
    }

    #[test]
    fn test_decode_inspect() {
        let query = SideQuery::new(SideQueryKind::Inspect, Some("len".into()));
        let text = "\x1b[0;31mSignature:\x1b[0m len(obj, /)\n\x1b[0;31mDocstring:\x1b[0m Return the number of items.\n\x1b[0;31mType:\x1b[0m builtin_function_or_method";
        let event = query
            .decode_inspect(true, &bundle(json!({"text/plain": text})))
            .unwrap();
        let Event::InspectionData { data } = event else {
            panic!("expected inspection data");
        };
        assert_eq!(data.name, "len");
        assert_eq!(data.type_name, "builtin_function_or_method");
        assert_eq!(data.definition, "len(obj, /)");
        assert_eq!(data.file, "");
        assert!(!data.docstring.contains('\x1b'));
    }

    #[test]
    fn test_inspect_not_found_is_silent() {
        let query = SideQuery::new(SideQueryKind::Inspect, Some("nope".into()));
        assert!(query.decode_inspect(false, &MimeBundle::new()).is_none());
    }

    #[test]
    fn test_housekeeping_programs() {
        let program = chdir_program(Path::new("/tmp/my dir"));
        assert!(program.contains(r#"chdir("/tmp/my dir")"#));

        assert!(plot_mode_program(PlotMode::Inline).contains(r#""matplotlib", "inline""#));
        assert!(plot_mode_program(PlotMode::Window).contains(r#""matplotlib", """#));
    }
}
