//! DoH Resolver (§4.5): discovers an alternative API base URL by querying
//! well-known DNS TXT records over DNS-over-HTTPS (RFC 8484), using the
//! wire (`application/dns-message`) format rather than JSON so the request
//! looks like ordinary DNS traffic to a passive observer.
//!
//! Each query is a GET with the wire-format message base64url-encoded
//! (no padding) into a `dns` query parameter, per RFC 8484 §4.1.
//!
//! Two nested loops, matching the reference implementation exactly:
//! the outer loop walks [`ENCODED_URLS`] one at a time and stops at the
//! first name that yields *any* TXT answers; the inner loop fans the same
//! name out to every configured provider concurrently and collects whatever
//! answers come back before the inner deadline.

use std::time::Duration;

use base64::Engine as _;
use rand::RngCore;

use crate::config::{DOH_CONNECT_TIMEOUT, DOH_OVERALL_DEADLINE, DOH_READ_TIMEOUT, ENCODED_URLS};
use crate::logger::{SessionEvent, SessionObserver};

const DNS_TYPE_TXT: u16 = 16;
const DNS_CLASS_IN: u16 = 1;

/// Try every encoded name against every provider in `providers` (§4.5
/// point 1); return the full set of alternative hostnames carried in the
/// first name's TXT answers, or an empty set if every name/provider
/// combination fails. Callers are responsible for trying each returned host
/// in turn (§4.7 step 2) — this never picks a "best" one itself.
pub async fn discover_alternative_hosts(providers: &[&str], observer: &dyn SessionObserver) -> Vec<String> {
    for name in ENCODED_URLS {
        let deadline = tokio::time::sleep(DOH_OVERALL_DEADLINE);
        tokio::pin!(deadline);

        let fan_out = query_all_providers(name, providers, observer);
        tokio::pin!(fan_out);

        let answers = tokio::select! {
            answers = &mut fan_out => answers,
            _ = &mut deadline => Vec::new(),
        };

        let hosts: Vec<String> = answers.iter().filter_map(|txt| extract_route(txt)).collect();
        if !hosts.is_empty() {
            return hosts;
        }
    }
    Vec::new()
}

/// Query every provider in `providers` for `name`'s TXT records concurrently,
/// returning every answer string any provider returned.
async fn query_all_providers(name: &str, providers: &[&str], observer: &dyn SessionObserver) -> Vec<String> {
    let client = match doh_client() {
        Ok(client) => client,
        Err(_) => return Vec::new(),
    };

    let futures = providers.iter().map(|provider| {
        let client = client.clone();
        async move {
            observer.on_event(SessionEvent::DohQuery {
                provider,
                encoded_name: name,
            });
            query_one_provider(&client, provider, name).await
        }
    });

    futures::future::join_all(futures)
        .await
        .into_iter()
        .flatten()
        .flatten()
        .collect()
}

fn doh_client() -> Result<reqwest::Client, reqwest::Error> {
    reqwest::Client::builder()
        .connect_timeout(DOH_CONNECT_TIMEOUT)
        .timeout(DOH_READ_TIMEOUT)
        .build()
}

/// Build the GET URL for one DoH query: `provider?dns=<urlsafe-base64-no-pad>`.
fn build_query_url(provider: &str, name: &str) -> Option<reqwest::Url> {
    let query = encode_query(name);
    let encoded = base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(&query);
    let mut url = reqwest::Url::parse(provider).ok()?;
    url.query_pairs_mut().append_pair("dns", &encoded);
    Some(url)
}

async fn query_one_provider(client: &reqwest::Client, provider: &str, name: &str) -> Option<Vec<String>> {
    let url = build_query_url(provider, name)?;

    let response = client
        .get(url)
        .header("Accept", "application/dns-message")
        .send()
        .await
        .ok()?;

    if !response.status().is_success() {
        return None;
    }

    let body = response.bytes().await.ok()?;
    let answers = parse_txt_answers(&body);
    if answers.is_empty() {
        None
    } else {
        Some(answers)
    }
}

/// Build a minimal DNS wire-format query for `name`'s TXT records.
fn encode_query(name: &str) -> Vec<u8> {
    let mut id = [0u8; 2];
    rand::thread_rng().fill_bytes(&mut id);

    let mut msg = Vec::with_capacity(32 + name.len());
    msg.extend_from_slice(&id); // ID
    msg.extend_from_slice(&[0x01, 0x00]); // flags: recursion desired
    msg.extend_from_slice(&[0x00, 0x01]); // QDCOUNT = 1
    msg.extend_from_slice(&[0x00, 0x00]); // ANCOUNT
    msg.extend_from_slice(&[0x00, 0x00]); // NSCOUNT
    msg.extend_from_slice(&[0x00, 0x00]); // ARCOUNT

    for label in name.split('.') {
        msg.push(label.len() as u8);
        msg.extend_from_slice(label.as_bytes());
    }
    msg.push(0x00); // root label

    msg.extend_from_slice(&DNS_TYPE_TXT.to_be_bytes());
    msg.extend_from_slice(&DNS_CLASS_IN.to_be_bytes());
    msg
}

/// Parse every TXT record's character-string payloads out of a DNS response.
///
/// Tolerant of malformed input: any parse failure yields an empty result
/// rather than a panic, since this reads bytes from the network.
fn parse_txt_answers(msg: &[u8]) -> Vec<String> {
    let mut answers = Vec::new();
    if msg.len() < 12 {
        return answers;
    }

    let qdcount = u16::from_be_bytes([msg[4], msg[5]]) as usize;
    let ancount = u16::from_be_bytes([msg[6], msg[7]]) as usize;

    let mut pos = 12usize;
    for _ in 0..qdcount {
        pos = match skip_name(msg, pos) {
            Some(p) => p + 4, // QTYPE + QCLASS
            None => return answers,
        };
    }

    for _ in 0..ancount {
        let after_name = match skip_name(msg, pos) {
            Some(p) => p,
            None => return answers,
        };
        if after_name + 10 > msg.len() {
            return answers;
        }
        let rtype = u16::from_be_bytes([msg[after_name], msg[after_name + 1]]);
        let rdlength = u16::from_be_bytes([msg[after_name + 8], msg[after_name + 9]]) as usize;
        let rdata_start = after_name + 10;
        let rdata_end = rdata_start + rdlength;
        if rdata_end > msg.len() {
            return answers;
        }

        if rtype == DNS_TYPE_TXT {
            if let Some(text) = parse_txt_rdata(&msg[rdata_start..rdata_end]) {
                answers.push(text);
            }
        }

        pos = rdata_end;
    }

    answers
}

/// TXT rdata is one or more length-prefixed character-strings; concatenate them.
fn parse_txt_rdata(rdata: &[u8]) -> Option<String> {
    let mut out = Vec::new();
    let mut i = 0;
    while i < rdata.len() {
        let len = rdata[i] as usize;
        i += 1;
        if i + len > rdata.len() {
            return None;
        }
        out.extend_from_slice(&rdata[i..i + len]);
        i += len;
    }
    String::from_utf8(out).ok()
}

/// Advance past a (possibly compressed) DNS name, returning the offset just
/// past it. Only used for names we don't need to decode, so pointers just
/// terminate the walk.
fn skip_name(msg: &[u8], mut pos: usize) -> Option<usize> {
    loop {
        let len = *msg.get(pos)? as usize;
        if len == 0 {
            return Some(pos + 1);
        }
        if len & 0xC0 == 0xC0 {
            return Some(pos + 2); // compression pointer, fixed 2 bytes
        }
        pos += 1 + len;
        if pos > msg.len() {
            return None;
        }
    }
}

/// Extract a bare alternative hostname from a raw TXT answer (§4.5 point 4):
/// the TXT value itself *is* the hostname, quote-stripped — no decoding of
/// any kind. Scheme-prefixing (`https://<host>`) is the retry loop's job
/// (§4.7 step 2), not the resolver's.
fn extract_route(txt: &str) -> Option<String> {
    let host = txt.trim().trim_matches('"').trim();
    if host.is_empty() {
        None
    } else {
        Some(host.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn build_response(id: [u8; 2], txt_payloads: &[&str]) -> Vec<u8> {
        let mut msg = Vec::new();
        msg.extend_from_slice(&id);
        msg.extend_from_slice(&[0x81, 0x80]); // standard response, no error
        msg.extend_from_slice(&[0x00, 0x01]); // QDCOUNT
        msg.extend_from_slice(&(txt_payloads.len() as u16).to_be_bytes()); // ANCOUNT
        msg.extend_from_slice(&[0x00, 0x00]);
        msg.extend_from_slice(&[0x00, 0x00]);

        for label in "example.com".split('.') {
            msg.push(label.len() as u8);
            msg.extend_from_slice(label.as_bytes());
        }
        msg.push(0x00);
        msg.extend_from_slice(&DNS_TYPE_TXT.to_be_bytes());
        msg.extend_from_slice(&DNS_CLASS_IN.to_be_bytes());

        for payload in txt_payloads {
            msg.push(0xC0);
            msg.push(0x0C); // pointer back to the question's name
            msg.extend_from_slice(&DNS_TYPE_TXT.to_be_bytes());
            msg.extend_from_slice(&DNS_CLASS_IN.to_be_bytes());
            msg.extend_from_slice(&300u32.to_be_bytes()); // TTL
            let rdata_len = payload.len() + 1;
            msg.extend_from_slice(&(rdata_len as u16).to_be_bytes());
            msg.push(payload.len() as u8);
            msg.extend_from_slice(payload.as_bytes());
        }

        msg
    }

    #[test]
    fn encode_query_has_well_formed_header_and_question() {
        let query = encode_query("abc.example.com");
        assert_eq!(query.len(), 12 + 1 + 3 + 1 + 7 + 1 + 3 + 1 + 4);
        assert_eq!(&query[4..6], &[0x00, 0x01]);
    }

    #[test]
    fn parses_single_txt_answer() {
        let msg = build_response([0x12, 0x34], &["hello-world"]);
        let answers = parse_txt_answers(&msg);
        assert_eq!(answers, vec!["hello-world".to_string()]);
    }

    #[test]
    fn parses_multiple_txt_answers() {
        let msg = build_response([0x00, 0x01], &["first", "second"]);
        let answers = parse_txt_answers(&msg);
        assert_eq!(answers, vec!["first".to_string(), "second".to_string()]);
    }

    #[test]
    fn malformed_message_yields_no_answers_without_panicking() {
        assert!(parse_txt_answers(&[0u8; 4]).is_empty());
        assert!(parse_txt_answers(&[]).is_empty());
    }

    #[test]
    fn extracts_bare_hostname_verbatim() {
        // §8 scenario 4's literal DoH answer: a bare hostname, no scheme,
        // no encoding of any kind.
        assert_eq!(extract_route("alt1.example"), Some("alt1.example".to_string()));
    }

    #[test]
    fn strips_surrounding_quotes() {
        assert_eq!(extract_route("\"alt1.example\""), Some("alt1.example".to_string()));
    }

    #[test]
    fn empty_txt_value_yields_no_route() {
        assert_eq!(extract_route(""), None);
        assert_eq!(extract_route("\"\""), None);
    }

    #[test]
    fn doh_timeouts_are_well_under_overall_deadline() {
        assert!(DOH_CONNECT_TIMEOUT + DOH_READ_TIMEOUT <= DOH_OVERALL_DEADLINE + Duration::from_millis(1));
    }

    #[test]
    fn query_url_is_a_get_with_urlsafe_base64_no_pad_dns_param() {
        let url = build_query_url("https://dns.google/dns-query", "abc.example.com").unwrap();
        assert_eq!(url.path(), "/dns-query");

        let (key, value) = url.query_pairs().next().expect("a dns query param");
        assert_eq!(key, "dns");
        assert!(!value.contains('='), "no padding in urlsafe base64");
        assert!(!value.contains('+') && !value.contains('/'), "must be urlsafe alphabet");

        let decoded = base64::engine::general_purpose::URL_SAFE_NO_PAD
            .decode(value.as_bytes())
            .expect("valid urlsafe base64");
        // Bytes 0..2 are a random transaction ID; the question section from
        // byte 12 on is deterministic for a given name.
        assert_eq!(decoded[12..], encode_query("abc.example.com")[12..]);
    }
}
