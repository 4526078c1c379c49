//! A test application: renders the request environment as an HTML table.

use super::error::AppError;
use super::hi::handler::FastcgiRequest;
use super::hi::response::FastcgiResponse;

use std::fmt::Write;

const PAGE_HEAD: &str = "\
<html>
  <head>
    <title>Test IIS FastCGI Application</title>
  </head>
  <body>
    <h1>Test IIS FastCGI Application</h1>
    <table border=\"1\">
      <thead>
        <tr><th colspan=\"2\">FastCGI Environment</th></tr>
        <tr><th>Key</th><th>Value</th></tr>
      </thead>
      <tbody>
";

const PAGE_TAIL: &str = "\
      </tbody>
    </table>
  </body>
</html>
";

fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            c => out.push(c),
        }
    }
    out
}

pub fn environ_page(request: &mut FastcgiRequest) -> Result<FastcgiResponse, AppError> {
    debug!("request {} with {} params", request.request_id, request.params.len());

    let mut keys: Vec<&String> = request.params.keys().collect();
    keys.sort();

    let mut page = String::from(PAGE_HEAD);
    for key in keys {
        writeln!(page, "        <tr><th>{}</th><td>{}</td></tr>",
                 escape(key), escape(&request.params[key]))?;
    }
    page.push_str(PAGE_TAIL);

    let mut response = FastcgiResponse::new("200 OK");
    response.set_header("Content-Type", "text/html");
    response.set_header("Content-Length", page.len().to_string());
    response.set_body(page);
    Ok(response)
}
