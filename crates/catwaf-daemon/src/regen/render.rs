//! Pure rendering of a site's proxy configuration.

use std::path::Path;

use crate::certs::CertLayout;
use crate::site::SiteDesiredState;

/// Keepalive connections held open per upstream.
const UPSTREAM_KEEPALIVE: u32 = 32;

const HSTS_HEADER: &str = r#"add_header Strict-Transport-Security "max-age=31536000; includeSubDomains" always;"#;

/// Inputs to rendering that do not come from the site record.
#[derive(Debug, Clone, Copy)]
pub struct RenderContext<'a> {
    pub certs: &'a CertLayout,
    pub acme_webroot: &'a Path,
    /// Certificate material is installed for the site's domain.
    pub cert_available: bool,
}

/// Upstream block name for `domain`.
pub fn upstream_name(domain: &str) -> String {
    let mut name: String = domain
        .to_ascii_lowercase()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
        .collect();
    name.push_str("_backend");
    name
}

/// Render the full configuration file for `site`.
///
/// The HTTPS server is only emitted once certificate material exists, so
/// the proxy never references files that are not there yet.
pub fn render_site(site: &SiteDesiredState, ctx: &RenderContext<'_>) -> String {
    let upstream = upstream_name(&site.domain);
    let tls_active = site.ssl.enabled && ctx.cert_available;
    let server_name = if site.wildcard {
        format!("*.{0} {0}", site.domain)
    } else {
        site.domain.clone()
    };

    let mut out = Writer::default();
    out.line(0, format!("# {} (site {}). Generated by catwaf; edits are overwritten.", site.domain, site.id));
    out.blank();

    out.line(0, format!("upstream {upstream} {{"));
    if let Some(directive) = site.lb_method.directive() {
        out.line(1, directive);
    }
    for backend in &site.backends {
        let mut server = format!("server {}", backend.endpoint());
        if backend.weight != 1 {
            server.push_str(&format!(" weight={}", backend.weight));
        }
        server.push_str(&format!(
            " max_fails={} fail_timeout={}s",
            backend.max_fails, backend.fail_timeout
        ));
        if backend.backup {
            server.push_str(" backup");
        }
        if backend.down {
            server.push_str(" down");
        }
        server.push(';');
        out.line(1, server);
    }
    out.line(1, format!("keepalive {UPSTREAM_KEEPALIVE};"));
    if site.health_check.enabled {
        out.line(
            1,
            format!(
                "# health_check interval={}s uri={}",
                site.health_check.interval, site.health_check.path
            ),
        );
    }
    out.line(0, "}");
    out.blank();

    out.line(0, "server {");
    out.line(1, "listen 80;");
    out.line(1, "listen [::]:80;");
    out.line(1, format!("server_name {server_name};"));
    out.blank();
    ban_guard(&mut out);
    well_known(&mut out, site);
    out.line(1, "location ^~ /.well-known/acme-challenge/ {");
    out.line(2, format!("root {};", ctx.acme_webroot.display()));
    out.line(2, r#"default_type "text/plain";"#);
    out.line(1, "}");
    out.blank();
    if tls_active {
        out.line(1, "location / {");
        out.line(2, "return 301 https://$host$request_uri;");
        out.line(1, "}");
    } else {
        proxy_location(&mut out, &upstream);
    }
    out.line(0, "}");

    if tls_active {
        out.blank();
        out.line(0, "server {");
        out.line(1, "listen 443 ssl;");
        out.line(1, "listen [::]:443 ssl;");
        out.line(1, "http2 on;");
        out.line(1, format!("server_name {server_name};"));
        out.blank();
        out.line(1, format!("ssl_certificate {};", ctx.certs.fullchain(&site.domain).display()));
        out.line(1, format!("ssl_certificate_key {};", ctx.certs.private_key(&site.domain).display()));
        out.line(1, "ssl_protocols TLSv1.2 TLSv1.3;");
        out.line(1, HSTS_HEADER);
        out.blank();
        ban_guard(&mut out);
        well_known(&mut out, site);
        proxy_location(&mut out, &upstream);
        out.line(0, "}");
    }

    out.finish()
}

fn ban_guard(out: &mut Writer) {
    out.line(1, "if ($ban) {");
    out.line(2, "return 403;");
    out.line(1, "}");
    out.blank();
}

fn well_known(out: &mut Writer, site: &SiteDesiredState) {
    for (path, body) in site.well_known.entries() {
        out.line(1, format!("location = {path} {{"));
        out.line(2, "default_type text/plain;");
        out.line(2, format!("return 200 \"{}\";", escape(body)));
        out.line(1, "}");
        out.blank();
    }
}

fn proxy_location(out: &mut Writer, upstream: &str) {
    out.line(1, "location / {");
    out.line(2, format!("proxy_pass http://{upstream};"));
    out.line(2, "proxy_http_version 1.1;");
    out.line(2, r#"proxy_set_header Connection "";"#);
    out.line(2, "proxy_set_header Host $host;");
    out.line(2, "proxy_set_header X-Real-IP $remote_addr;");
    out.line(2, "proxy_set_header X-Forwarded-For $proxy_add_x_forwarded_for;");
    out.line(2, "proxy_set_header X-Forwarded-Proto $scheme;");
    out.line(1, "}");
}

/// Quote `body` for a double-quoted config string.
fn escape(body: &str) -> String {
    let mut out = String::with_capacity(body.len());
    for c in body.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            '\n' => out.push_str("\\n"),
            '\t' => out.push_str("\\t"),
            '\r' => {}
            c => out.push(c),
        }
    }
    out
}

#[derive(Default)]
struct Writer {
    buf: String,
}

impl Writer {
    fn line(&mut self, indent: usize, text: impl AsRef<str>) {
        for _ in 0..indent {
            self.buf.push_str("    ");
        }
        self.buf.push_str(text.as_ref());
        self.buf.push('\n');
    }

    fn blank(&mut self) {
        self.buf.push('\n');
    }

    fn finish(self) -> String {
        self.buf
    }
}

#[cfg(test)]
#[allow(clippy::panic, clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::site::tests::row;

    fn site(backends: &str) -> SiteDesiredState {
        SiteDesiredState::try_from(row("Example.test", backends)).unwrap()
    }

    fn render(site: &SiteDesiredState, cert_available: bool) -> String {
        let certs = CertLayout::new("/etc/nginx/certs");
        render_site(
            site,
            &RenderContext {
                certs: &certs,
                acme_webroot: Path::new("/var/www/certbot"),
                cert_available,
            },
        )
    }

    #[test]
    fn upstream_names_are_sanitized() {
        assert_eq!(upstream_name("Example.test"), "example_test_backend");
        assert_eq!(upstream_name("a-b.c_d"), "a_b_c_d_backend");
    }

    #[test]
    fn backend_lines() {
        let mut s = site(
            r#"[{"address":"10.0.0.1","port":8080,"weight":2,"backup":true},
                {"address":"10.0.0.2","max_fails":5,"fail_timeout":10,"down":true}]"#,
        );
        s.lb_method = crate::site::LbMethod::LeastConn;
        let conf = render(&s, false);

        assert!(conf.contains("upstream example_test_backend {\n    least_conn;\n"));
        assert!(conf.contains(
            "    server 10.0.0.1:8080 weight=2 max_fails=3 fail_timeout=30s backup;\n"
        ));
        assert!(conf.contains("    server 10.0.0.2 max_fails=5 fail_timeout=10s down;\n"));
        assert!(conf.contains("    keepalive 32;\n"));
    }

    #[test]
    fn http_only_without_certificate() {
        let mut s = site(r#"[{"address":"10.0.0.1"}]"#);
        s.ssl.enabled = true;
        let conf = render(&s, false);

        assert!(!conf.contains("listen 443"));
        assert!(!conf.contains("ssl_certificate"));
        assert!(conf.contains("proxy_pass http://example_test_backend;"));
        assert!(conf.contains("location ^~ /.well-known/acme-challenge/ {\n        root /var/www/certbot;"));
        assert!(conf.contains("if ($ban) {\n        return 403;\n    }"));
    }

    #[test]
    fn tls_server_with_certificate() {
        let mut s = site(r#"[{"address":"10.0.0.1"}]"#);
        s.ssl.enabled = true;
        let conf = render(&s, true);

        assert!(conf.contains("return 301 https://$host$request_uri;"));
        assert!(conf.contains("listen 443 ssl;"));
        assert!(conf.contains("ssl_certificate /etc/nginx/certs/Example.test/fullchain.pem;"));
        assert!(conf.contains("ssl_certificate_key /etc/nginx/certs/Example.test/key.pem;"));
        assert!(conf.contains("Strict-Transport-Security"));
        assert_eq!(conf.matches("if ($ban)").count(), 2);
    }

    #[test]
    fn certificate_ignored_when_ssl_disabled() {
        let s = site(r#"[{"address":"10.0.0.1"}]"#);
        let conf = render(&s, true);
        assert!(!conf.contains("listen 443"));
        assert!(!conf.contains("return 301"));
    }

    #[test]
    fn wildcard_server_name() {
        let mut s = site(r#"[{"address":"10.0.0.1"}]"#);
        s.wildcard = true;
        let conf = render(&s, false);
        assert!(conf.contains("server_name *.Example.test Example.test;"));
    }

    #[test]
    fn well_known_files_are_inline_and_escaped() {
        let mut s = site(r#"[{"address":"10.0.0.1"}]"#);
        s.well_known.robots_txt = Some("User-agent: *\nDisallow: /\"admin\"".to_string());
        s.well_known.ads_txt = Some("   ".to_string());
        let conf = render(&s, false);

        assert!(conf.contains("location = /robots.txt {"));
        assert!(conf.contains(r#"return 200 "User-agent: *\nDisallow: /\"admin\"";"#));
        assert!(!conf.contains("/ads.txt"));
    }

    #[test]
    fn health_check_annotation() {
        let mut s = site(r#"[{"address":"10.0.0.1"}]"#);
        s.health_check.enabled = true;
        s.health_check.path = "/healthz".to_string();
        let conf = render(&s, false);
        assert!(conf.contains("    # health_check interval=30s uri=/healthz\n"));
    }
}
