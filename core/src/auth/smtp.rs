//! Server-side SMTP authentication bridge: a per-connection streaming
//! pipeline that forks the bytes of the DATA phase to DKIM
//! canonicalization/hashing and a header-only copy for DMARC alignment,
//! detecting the end of headers (a bare CRLFCRLF, which a client is
//! free to split across writes) without buffering the whole message.
//!
//! The actual cryptographic rules (SPF record evaluation, DKIM
//! signature verification, DMARC policy lookup) are supplied by the
//! caller through the [`SpfEvaluator`], [`DkimVerifier`], and
//! [`DmarcPolicy`] traits; this module only owns the byte-forking and
//! phase bookkeeping around them.

use std::net::IpAddr;

use sha2::{Digest, Sha256};

use crate::auth::AuthError;

const CRLFCRLF: [u8; 4] = [b'\r', b'\n', b'\r', b'\n'];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpfResult {
    Pass,
    Fail,
    SoftFail,
    Neutral,
    None,
    TempError,
    PermError,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DkimResult {
    Pass,
    Fail,
    None,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DmarcResult {
    Pass,
    Fail,
    None,
}

/// Inputs captured at MAIL FROM time, the only point SPF can be
/// evaluated (RFC 7208 §2.3).
#[derive(Debug, Clone)]
pub struct MailContext {
    pub client_ip: IpAddr,
    pub helo_domain: Option<String>,
    pub mail_from_domain: Option<String>,
}

pub trait SpfEvaluator: Send {
    fn evaluate(&mut self, ctx: &MailContext) -> SpfResult;
}

/// Verifies a DKIM signature against canonicalized header bytes and a
/// finished body hash. Canonicalization and hashing are this module's
/// job; the signature math is the caller's.
pub trait DkimVerifier: Send {
    fn verify(&mut self, canonical_headers: &[u8], body_hash: &[u8; 32]) -> DkimResult;
}

pub trait DmarcPolicy: Send {
    fn evaluate(&mut self, spf: SpfResult, dkim: DkimResult, from_domain: &str) -> DmarcResult;
}

/// Exactly one of these is delivered per message, after `end_data`.
#[derive(Debug, Clone, Copy)]
pub struct Verdicts {
    pub spf: Option<SpfResult>,
    pub dkim: Option<DkimResult>,
    pub dmarc: Option<DmarcResult>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    AwaitingMailFrom,
    Headers,
    Body,
    Complete,
}

/// Per-connection streaming auth pipeline. One instance is reused
/// across every message sent on a connection via [`reset`](Self::reset).
pub struct SmtpAuthPipeline {
    phase: Phase,
    dkim_enabled: bool,
    dmarc_enabled: bool,
    mail_context: Option<MailContext>,
    spf_result: Option<SpfResult>,
    from_domain: Option<String>,
    header_buf: Vec<u8>,
    body_hasher: Sha256,
    /// Up to 3 trailing bytes that might be a prefix of CRLFCRLF split
    /// across writes; held back from `header_buf` until the next chunk
    /// resolves whether they are.
    carry: Vec<u8>,
}

impl SmtpAuthPipeline {
    /// `dmarc_enabled` implicitly turns on DKIM, since DMARC alignment
    /// needs a DKIM verdict.
    #[must_use]
    pub fn new(dkim_enabled: bool, dmarc_enabled: bool) -> Self {
        Self {
            phase: Phase::AwaitingMailFrom,
            dkim_enabled: dkim_enabled || dmarc_enabled,
            dmarc_enabled,
            mail_context: None,
            spf_result: None,
            from_domain: None,
            header_buf: Vec::new(),
            body_hasher: Sha256::new(),
            carry: Vec::new(),
        }
    }

    /// Evaluate SPF with the caller-supplied evaluator and move into the
    /// header phase. Must be called once per message before `feed_data`.
    pub fn mail_from(&mut self, ctx: MailContext, evaluator: &mut dyn SpfEvaluator) -> Result<(), AuthError> {
        if self.phase != Phase::AwaitingMailFrom {
            return Err(AuthError::PipelineState("mail_from called outside of the command phase".into()));
        }
        self.spf_result = Some(evaluator.evaluate(&ctx));
        self.mail_context = Some(ctx);
        self.phase = Phase::Headers;
        Ok(())
    }

    /// Feed the next chunk of DATA-phase bytes. Detects the header/body
    /// boundary (a bare CRLFCRLF) even when it straddles two calls to
    /// this method, and forks bytes to the header buffer or the running
    /// body hash accordingly.
    pub fn feed_data(&mut self, chunk: &[u8]) -> Result<(), AuthError> {
        match self.phase {
            Phase::Headers => self.feed_header_bytes(chunk),
            Phase::Body => {
                self.body_hasher.update(chunk);
                Ok(())
            }
            Phase::AwaitingMailFrom => {
                Err(AuthError::PipelineState("feed_data called before mail_from".into()))
            }
            Phase::Complete => Err(AuthError::PipelineState("feed_data called after end_data".into())),
        }
    }

    fn feed_header_bytes(&mut self, chunk: &[u8]) -> Result<(), AuthError> {
        self.carry.extend_from_slice(chunk);

        if let Some(pos) = find(&self.carry, &CRLFCRLF) {
            let boundary = self.carry[..pos].to_vec();
            let rest = self.carry[pos + CRLFCRLF.len()..].to_vec();
            self.header_buf.extend_from_slice(&boundary);
            self.carry.clear();
            self.from_domain = extract_from_domain(&self.header_buf);
            self.phase = Phase::Body;
            if !rest.is_empty() {
                self.body_hasher.update(&rest);
            }
            return Ok(());
        }

        // Bytes further back than 3 from the end can no longer be part
        // of an as-yet-unseen CRLFCRLF, so they're safe to commit.
        let safe_len = self.carry.len().saturating_sub(CRLFCRLF.len() - 1);
        if safe_len > 0 {
            let confirmed: Vec<u8> = self.carry.drain(..safe_len).collect();
            self.header_buf.extend_from_slice(&confirmed);
        }
        Ok(())
    }

    /// Finalize the message: canonicalize the collected header bytes,
    /// run DKIM verification and DMARC alignment if enabled, and return
    /// the verdicts. Callers must not call this more than once per
    /// message; call [`reset`](Self::reset) before the next one.
    pub fn end_data(
        &mut self,
        dkim: &mut dyn DkimVerifier,
        dmarc: &mut dyn DmarcPolicy,
    ) -> Result<Verdicts, AuthError> {
        if self.phase != Phase::Body {
            return Err(AuthError::PipelineState("end_data called before end of headers".into()));
        }

        let dkim_result = if self.dkim_enabled {
            let canonical = canonicalize_headers(&self.header_buf);
            let body_hash: [u8; 32] = self.body_hasher.clone().finalize().into();
            Some(dkim.verify(&canonical, &body_hash))
        } else {
            None
        };

        let dmarc_result = if self.dmarc_enabled {
            let from_domain = self
                .from_domain
                .as_deref()
                .ok_or_else(|| AuthError::PipelineState("no RFC 5322 From header found for DMARC".into()))?;
            let spf = self.spf_result.unwrap_or(SpfResult::None);
            let dkim_verdict = dkim_result.unwrap_or(DkimResult::None);
            Some(dmarc.evaluate(spf, dkim_verdict, from_domain))
        } else {
            None
        };

        self.phase = Phase::Complete;
        Ok(Verdicts { spf: self.spf_result, dkim: dkim_result, dmarc: dmarc_result })
    }

    /// Clear all per-message state so this pipeline can be reused for
    /// the next message on the same connection.
    pub fn reset(&mut self) {
        self.phase = Phase::AwaitingMailFrom;
        self.mail_context = None;
        self.spf_result = None;
        self.from_domain = None;
        self.header_buf.clear();
        self.body_hasher = Sha256::new();
        self.carry.clear();
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|window| window == needle)
}

/// Relaxed header canonicalization per RFC 6376 §3.4.2, applied once
/// the whole header block is known: lowercase the field name, drop
/// whitespace around the colon, and collapse internal whitespace runs
/// in the value to a single space.
fn canonicalize_headers(raw: &[u8]) -> Vec<u8> {
    let text = String::from_utf8_lossy(raw);
    let mut out = Vec::new();
    for line in text.split("\r\n").filter(|l| !l.is_empty()) {
        let Some((name, value)) = line.split_once(':') else { continue };
        let name = name.trim().to_ascii_lowercase();
        let value: Vec<&str> = value.split_whitespace().collect();
        out.extend_from_slice(name.as_bytes());
        out.push(b':');
        out.extend_from_slice(value.join(" ").as_bytes());
        out.extend_from_slice(b"\r\n");
    }
    out
}

/// Pull the domain out of an RFC 5322 `From:` header for DMARC
/// identifier alignment, e.g. `From: Jane <jane@example.com>` → `example.com`.
fn extract_from_domain(raw: &[u8]) -> Option<String> {
    let text = String::from_utf8_lossy(raw);
    for line in text.split("\r\n") {
        let (name, value) = line.split_once(':')?;
        if !name.trim().eq_ignore_ascii_case("from") {
            continue;
        }
        let at = value.rfind('@')?;
        let domain: String = value[at + 1..]
            .chars()
            .take_while(|c| c.is_ascii_alphanumeric() || *c == '.' || *c == '-')
            .collect();
        if !domain.is_empty() {
            return Some(domain.to_ascii_lowercase());
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    struct FixedSpf(SpfResult);
    impl SpfEvaluator for FixedSpf {
        fn evaluate(&mut self, _ctx: &MailContext) -> SpfResult {
            self.0
        }
    }

    struct FixedDkim(DkimResult);
    impl DkimVerifier for FixedDkim {
        fn verify(&mut self, _canonical_headers: &[u8], _body_hash: &[u8; 32]) -> DkimResult {
            self.0
        }
    }

    struct FixedDmarc(DmarcResult);
    impl DmarcPolicy for FixedDmarc {
        fn evaluate(&mut self, _spf: SpfResult, _dkim: DkimResult, _from_domain: &str) -> DmarcResult {
            self.0
        }
    }

    fn mail_context() -> MailContext {
        MailContext {
            client_ip: IpAddr::V4(Ipv4Addr::new(192, 0, 2, 1)),
            helo_domain: Some("mail.example.com".into()),
            mail_from_domain: Some("example.com".into()),
        }
    }

    #[test]
    fn detects_end_of_headers_split_across_three_writes() {
        let mut pipeline = SmtpAuthPipeline::new(true, false);
        pipeline.mail_from(mail_context(), &mut FixedSpf(SpfResult::Pass)).unwrap();

        pipeline.feed_data(b"A: B\r").unwrap();
        pipeline.feed_data(b"\n\r").unwrap();
        assert_eq!(pipeline.phase, Phase::Headers);
        pipeline.feed_data(b"\nbody").unwrap();
        assert_eq!(pipeline.phase, Phase::Body);

        assert_eq!(pipeline.header_buf, b"A: B");

        let mut expected_body_hasher = Sha256::new();
        expected_body_hasher.update(b"body");
        assert_eq!(pipeline.body_hasher.clone().finalize(), expected_body_hasher.finalize());
    }

    #[test]
    fn end_data_fires_exactly_one_verdict_set() {
        let mut pipeline = SmtpAuthPipeline::new(true, true);
        pipeline.mail_from(mail_context(), &mut FixedSpf(SpfResult::Pass)).unwrap();
        pipeline.feed_data(b"From: Jane <jane@example.com>\r\n\r\n").unwrap();
        pipeline.feed_data(b"hello world").unwrap();

        let verdicts = pipeline
            .end_data(&mut FixedDkim(DkimResult::Pass), &mut FixedDmarc(DmarcResult::Pass))
            .unwrap();
        assert_eq!(verdicts.spf, Some(SpfResult::Pass));
        assert_eq!(verdicts.dkim, Some(DkimResult::Pass));
        assert_eq!(verdicts.dmarc, Some(DmarcResult::Pass));

        assert!(matches!(
            pipeline.end_data(&mut FixedDkim(DkimResult::Pass), &mut FixedDmarc(DmarcResult::Pass)),
            Err(AuthError::PipelineState(_))
        ));
    }

    #[test]
    fn dmarc_enabled_implicitly_enables_dkim() {
        let pipeline = SmtpAuthPipeline::new(false, true);
        assert!(pipeline.dkim_enabled);
    }

    #[test]
    fn reset_clears_state_for_reuse_across_messages() {
        let mut pipeline = SmtpAuthPipeline::new(true, false);
        pipeline.mail_from(mail_context(), &mut FixedSpf(SpfResult::Pass)).unwrap();
        pipeline.feed_data(b"A: B\r\n\r\nbody").unwrap();
        pipeline.end_data(&mut FixedDkim(DkimResult::Pass), &mut FixedDmarc(DmarcResult::None)).unwrap();

        pipeline.reset();
        assert_eq!(pipeline.phase, Phase::AwaitingMailFrom);
        assert!(pipeline.header_buf.is_empty());

        pipeline.mail_from(mail_context(), &mut FixedSpf(SpfResult::Fail)).unwrap();
        pipeline.feed_data(b"X: Y\r\n\r\nagain").unwrap();
        let verdicts = pipeline
            .end_data(&mut FixedDkim(DkimResult::Fail), &mut FixedDmarc(DmarcResult::Fail))
            .unwrap();
        assert_eq!(verdicts.spf, Some(SpfResult::Fail));
    }

    #[test]
    fn canonicalize_headers_lowercases_name_and_trims_colon_whitespace() {
        let canonical = canonicalize_headers(b"Subject:   Hello   World  ");
        assert_eq!(canonical, b"subject:Hello World\r\n");
    }

    #[test]
    fn extract_from_domain_reads_display_name_form() {
        let domain = extract_from_domain(b"From: Jane Doe <jane@example.com>\r\n");
        assert_eq!(domain.as_deref(), Some("example.com"));
    }
}
