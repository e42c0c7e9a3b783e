//! HTML pages of the web interface.
//!
//! Templates contain `{name}` placeholders. Rendering is a single pass over
//! the template source, so substituted values are never scanned for further
//! placeholders. Text values are HTML-escaped; markup produced by the server
//! itself is inserted with [`Value::Html`].

use std::borrow::Cow;

pub enum Value<'a> {
    Text(Cow<'a, str>),
    Html(Cow<'a, str>),
}

impl<'a> Value<'a> {
    pub fn text(value: impl Into<Cow<'a, str>>) -> Self {
        Value::Text(value.into())
    }

    pub fn html(value: impl Into<Cow<'a, str>>) -> Self {
        Value::Html(value.into())
    }
}

impl<'a> From<&'a str> for Value<'a> {
    fn from(value: &'a str) -> Self {
        Value::text(value)
    }
}

impl From<String> for Value<'_> {
    fn from(value: String) -> Self {
        Value::text(value)
    }
}

pub struct Template(&'static str);

impl Template {
    pub fn render(&self, fields: &[(&str, Value<'_>)]) -> String {
        let mut out = String::with_capacity(self.0.len());
        let mut rest = self.0;

        while let Some(open) = rest.find('{') {
            out.push_str(&rest[..open]);
            let tail = &rest[open + 1..];

            let value = tail.find('}').and_then(|close| {
                let name = &tail[..close];
                fields
                    .iter()
                    .find(|(field, _)| *field == name)
                    .map(|(_, value)| (close, value))
            });

            match value {
                Some((close, value)) => {
                    match value {
                        Value::Text(text) => out.push_str(&escape_html(text)),
                        Value::Html(html) => out.push_str(html),
                    }
                    rest = &tail[close + 1..];
                }
                None => {
                    out.push('{');
                    rest = tail;
                }
            }
        }

        out.push_str(rest);
        out
    }
}

pub fn escape_html(text: &str) -> Cow<'_, str> {
    if !text.contains(['&', '<', '>', '"', '\'']) {
        return Cow::Borrowed(text);
    }

    let mut escaped = String::with_capacity(text.len() + 16);
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            c => escaped.push(c),
        }
    }
    Cow::Owned(escaped)
}

/// Wrap a page body into the common page layout
pub fn page(body: &str) -> String {
    PAGE.render(&[("body", Value::html(body))])
}

pub const PAGE: Template = Template(
    r#"<!DOCTYPE html>
<html>
<head>
<meta charset="utf-8">
<meta name="viewport" content="width=device-width, initial-scale=1">
<title>Bridge</title>
<style>
body { font-family: sans-serif; margin: 1em; }
table { border-collapse: collapse; }
td { padding: 2px 8px; }
</style>
</head>
<body>
<p><a href="/getsysconfig">System</a> | <a href="/getapconfig">Access Point</a> | <a href="/getstaconfig">Station</a> | <a href="/getstatus">Status</a> | <a href="/update">Update</a> | <a href="/help">Help</a> | <a href="/login?DISCONNECT=1">Logout</a></p>
{body}
</body>
</html>
"#,
);

pub const LOGIN_FORM: Template = Template(
    r#"<h1>Login</h1>
<form action="/login" method="post">
<p><label>User <input type="text" name="USERNAME"></label></p>
<p><label>Password <input type="password" name="PASSWORD"></label></p>
<p><input type="submit" value="Login"></p>
</form>
<p>{msg}</p>
"#,
);

pub const SYSTEM_CONFIG: Template = Template(
    r#"<h1>System</h1>
<form action="/setparameters" method="post">
<table>
<tr><td>UART baud rate</td><td><input type="text" name="baud" value="{baud}"></td></tr>
<tr><td>Debug (0/1)</td><td><input type="text" name="debug" value="{debug}"></td></tr>
<tr><td>WiFi mode (0 = AP, 1 = STA)</td><td><input type="text" name="mode" value="{mode}"></td></tr>
<tr><td>Web account</td><td><input type="text" name="webaccount" value="{webaccount}"></td></tr>
<tr><td>Web password</td><td><input type="password" name="webpassword" value="{webpassword}"></td></tr>
<tr><td>Reboot</td><td><input type="checkbox" name="reboot" value="1"></td></tr>
</table>
<p><input type="submit" value="Save"></p>
</form>
"#,
);

pub const AP_CONFIG: Template = Template(
    r#"<h1>Access Point</h1>
<form action="/setparameters" method="post">
<table>
<tr><td>Channel</td><td><input type="text" name="channel" value="{channel}"></td></tr>
<tr><td>SSID</td><td><input type="text" name="ssid" value="{ssid}"></td></tr>
<tr><td>Password</td><td><input type="password" name="pwd" value="{pwd}"></td></tr>
<tr><td>Host UDP port</td><td><input type="text" name="hport" value="{hport}"></td></tr>
<tr><td>Reboot</td><td><input type="checkbox" name="reboot" value="1"></td></tr>
</table>
<p><input type="submit" value="Save"></p>
</form>
"#,
);

pub const STA_CONFIG: Template = Template(
    r#"<h1>Station</h1>
<form action="/setparameters" method="post">
<table>
<tr><td>SSID</td><td><input type="text" name="ssidsta" value="{ssidsta}"></td></tr>
<tr><td>Password</td><td><input type="password" name="pwdsta" value="{pwdsta}"></td></tr>
<tr><td>IP address</td><td><input type="text" name="ipsta" value="{ipsta}"></td></tr>
<tr><td>Client UDP port</td><td><input type="text" name="cport" value="{cport}"></td></tr>
<tr><td>Gateway</td><td><input type="text" name="gatewaysta" value="{gatewaysta}"></td></tr>
<tr><td>Subnet mask</td><td><input type="text" name="subnetsta" value="{subnetsta}"></td></tr>
<tr><td>Reboot</td><td><input type="checkbox" name="reboot" value="1"></td></tr>
</table>
<p><input type="submit" value="Save"></p>
</form>
"#,
);

pub const UPLOAD_FORM: Template = Template(
    r#"<h1>Firmware Update</h1>
<form action="/upload" method="post" enctype="multipart/form-data">
<p><input type="file" name="update"></p>
<p><input type="submit" value="Update"></p>
</form>
<p>The device restarts after the upload.</p>
"#,
);

pub const HELP: Template = Template(
    r#"<h1>Help</h1>
<table>
<tr><td>/getsysconfig</td><td>system settings</td></tr>
<tr><td>/getapconfig</td><td>access point settings</td></tr>
<tr><td>/getstaconfig</td><td>station settings</td></tr>
<tr><td>/setparameters</td><td>change settings: baud, debug, mode, webaccount, webpassword, ssid, pwd, channel, hport, ssidsta, pwdsta, ipsta, gatewaysta, subnetsta, cport, reboot=1</td></tr>
<tr><td>/getstatus</td><td>link and system status</td></tr>
<tr><td>/info.json</td><td>system information</td></tr>
<tr><td>/status.json</td><td>link counters, r=1 resets them</td></tr>
<tr><td>/log.json</td><td>device log from position</td></tr>
<tr><td>/update</td><td>firmware update</td></tr>
</table>
"#,
);

pub const NOT_FOUND_ECHO: Template = Template(
    "<label>URI: {uri}\nMethod: {method}\nArguments: {count}\n</label>{args}",
);

pub const ERROR_PAGE: Template = Template(
    r#"<h1>404</h1>
<p>The requested page does not exist. <a href="/">Back</a></p>
"#,
);
