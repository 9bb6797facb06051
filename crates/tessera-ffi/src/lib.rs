//! C FFI bindings for the Tessera template engine.
//!
//! Exposes `ts_render_json` and `ts_string_free` for use from Ruby (Fiddle) and other FFI consumers.

use std::ffi::{CStr, CString};
use std::os::raw::c_char;
use std::ptr;

use tessera::{Location, OptionsConfig, ParserOptionsBuilder, TemplateError};

/// Render a Tessera template with JSON data.
///
/// # Safety
///
/// - `template_utf8` must be a valid null-terminated UTF-8 string.
/// - `data_json_utf8` must be a valid null-terminated UTF-8 JSON string.
/// - `options_json_utf8_or_null` may be null, or a valid null-terminated UTF-8 JSON object with
///   the fields of `OptionsConfig` (any field may be omitted).
/// - `out_error_json_utf8` must be a valid pointer to a `*mut c_char` (initially null).
///
/// On success, returns a pointer to a null-terminated UTF-8 string.
/// The caller must free it with `ts_string_free`.
///
/// On error, returns null and writes an error JSON string to `*out_error_json_utf8`.
/// The caller must free the error string with `ts_string_free`.
#[no_mangle]
pub unsafe extern "C" fn ts_render_json(
    template_utf8: *const c_char,
    data_json_utf8: *const c_char,
    options_json_utf8_or_null: *const c_char,
    out_error_json_utf8: *mut *mut c_char,
) -> *mut c_char {
    // Safety: caller guarantees valid pointers
    let template = match CStr::from_ptr(template_utf8).to_str() {
        Ok(s) => s,
        Err(e) => {
            write_error(out_error_json_utf8, "Io", &e.to_string(), None);
            return ptr::null_mut();
        }
    };

    let data_json = match CStr::from_ptr(data_json_utf8).to_str() {
        Ok(s) => s,
        Err(e) => {
            write_error(out_error_json_utf8, "Io", &e.to_string(), None);
            return ptr::null_mut();
        }
    };

    let config = if options_json_utf8_or_null.is_null() {
        OptionsConfig::default()
    } else {
        let parsed = CStr::from_ptr(options_json_utf8_or_null)
            .to_str()
            .map_err(|e| TemplateError::Custom(e.to_string()))
            .and_then(OptionsConfig::from_json);
        match parsed {
            Ok(config) => config,
            Err(err) => {
                write_template_error(out_error_json_utf8, &err);
                return ptr::null_mut();
            }
        }
    };

    let data: serde_json::Value = match serde_json::from_str(data_json) {
        Ok(v) => v,
        Err(e) => {
            write_error(out_error_json_utf8, "Json", &e.to_string(), None);
            return ptr::null_mut();
        }
    };

    let options = ParserOptionsBuilder::from_config(OptionsConfig {
        template: template.to_string(),
        ..config
    })
    .build();

    match tessera::render_with_options(options, data) {
        Ok(output) => match CString::new(output) {
            Ok(cs) => cs.into_raw(),
            Err(e) => {
                write_error(out_error_json_utf8, "Io", &e.to_string(), None);
                ptr::null_mut()
            }
        },
        Err(err) => {
            write_template_error(out_error_json_utf8, &err);
            ptr::null_mut()
        }
    }
}

/// Free a string previously returned by `ts_render_json` or written to `out_error_json_utf8`.
///
/// # Safety
///
/// `p` must be a pointer previously returned by this crate via `CString::into_raw`,
/// or null (in which case this is a no-op).
#[no_mangle]
pub unsafe extern "C" fn ts_string_free(p: *mut c_char) {
    if !p.is_null() {
        drop(CString::from_raw(p));
    }
}

/// Error kind and source location reported for `err`.
fn describe(err: &TemplateError) -> (&'static str, Option<Location>) {
    match err {
        TemplateError::InvalidTemplate { diagnostics } => (
            "InvalidTemplate",
            diagnostics
                .iter()
                .find(|d| d.is_error())
                .map(|d| d.range.start),
        ),
        TemplateError::Build(_) => ("InvalidTemplate", None),
        TemplateError::UnresolvedPath { location, .. } => ("UnresolvedPath", Some(*location)),
        TemplateError::TypeError { location, .. } => ("TypeError", Some(*location)),
        TemplateError::PartialStackOverflow { .. } => ("PartialStackOverflow", None),
        TemplateError::PartialNotFound { location, .. } => ("PartialNotFound", Some(*location)),
        TemplateError::FormatterNotFound { location, .. } => ("FormatterNotFound", Some(*location)),
        TemplateError::Formatter { location, .. } => ("Formatter", Some(*location)),
        TemplateError::Timeout(_) => ("Timeout", None),
        TemplateError::Cancelled => ("Cancelled", None),
        TemplateError::Custom(_) => ("Custom", None),
        TemplateError::Io(_) => ("Io", None),
        TemplateError::Json(_) => ("Json", None),
    }
}

/// Convert a `TemplateError` to error JSON and write it to the output pointer.
unsafe fn write_template_error(out: *mut *mut c_char, err: &TemplateError) {
    let (error_type, location) = describe(err);
    write_error(out, error_type, &err.to_string(), location);
}

/// Write an error JSON string to the output pointer.
unsafe fn write_error(
    out: *mut *mut c_char,
    error_type: &str,
    message: &str,
    location: Option<Location>,
) {
    let json = serde_json::json!({
        "type": error_type,
        "message": message,
        "line": location.map(|l| l.line),
        "column": location.map(|l| l.column),
    });

    if let Ok(cs) = CString::new(json.to_string()) {
        *out = cs.into_raw();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::ffi::CString;

    /// Render through the C entry point, returning the output or the decoded error JSON.
    fn render(template: &str, data: &str, options: Option<&str>) -> Result<String, serde_json::Value> {
        let template = CString::new(template).unwrap();
        let data = CString::new(data).unwrap();
        let options = options.map(|o| CString::new(o).unwrap());
        let options_ptr = options.as_ref().map_or(ptr::null(), |o| o.as_ptr());
        let mut err_ptr: *mut c_char = ptr::null_mut();

        unsafe {
            let result = ts_render_json(template.as_ptr(), data.as_ptr(), options_ptr, &mut err_ptr);
            if result.is_null() {
                assert!(!err_ptr.is_null(), "Expected error JSON");
                let err_json = CStr::from_ptr(err_ptr).to_str().unwrap().to_string();
                ts_string_free(err_ptr);
                Err(serde_json::from_str(&err_json).unwrap())
            } else {
                assert!(err_ptr.is_null());
                let output = CStr::from_ptr(result).to_str().unwrap().to_string();
                ts_string_free(result);
                Ok(output)
            }
        }
    }

    #[test]
    fn test_render_simple() {
        let output = render("Hello, {{name}}!", r#"{"name": "World"}"#, None).unwrap();
        assert_eq!(output, "Hello, World!");
    }

    #[test]
    fn test_render_html_escaping() {
        let output = render("{{html}}|{{&html}}", r#"{"html": "<b>"}"#, None).unwrap();
        assert_eq!(output, "&lt;b&gt;|<b>");
    }

    #[test]
    fn test_render_with_options() {
        let output = render(
            "{{missing}}{{html}}",
            r#"{"html": "<b>"}"#,
            Some(r#"{"null_substitute": "-", "disable_content_escaping": true}"#),
        )
        .unwrap();
        assert_eq!(output, "-<b>");
    }

    #[test]
    fn test_render_parse_error() {
        let err = render("line one\n{{#if a}}open", "{}", None).unwrap_err();
        assert_eq!(err["type"], "InvalidTemplate");
        assert_eq!(err["line"], 2);
        assert_eq!(err["column"], 1);
    }

    #[test]
    fn test_strict_path_error() {
        let err = render("{{user.name}}", "{}", Some(r#"{"strict_paths": true}"#)).unwrap_err();
        assert_eq!(err["type"], "UnresolvedPath");
        assert!(err["message"].as_str().unwrap().contains("user.name"));
        assert_eq!(err["line"], 1);
    }

    #[test]
    fn test_invalid_json_data() {
        let err = render("Hello", "not valid json", None).unwrap_err();
        assert_eq!(err["type"], "Json");
        assert!(err["line"].is_null());
    }

    #[test]
    fn test_invalid_options_json() {
        let err = render("Hello", "{}", Some(r#"{"max_size": "big"}"#)).unwrap_err();
        assert_eq!(err["type"], "Json");
    }

    #[test]
    fn test_string_free_null() {
        // Should be a no-op
        unsafe {
            ts_string_free(ptr::null_mut());
        }
    }
}
