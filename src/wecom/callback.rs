// 企业微信回调解码：签名校验、AES 解密与 XML 字段提取。
use aes::cipher::block_padding::NoPadding;
use aes::cipher::{BlockDecryptMut, KeyIvInit};
#[cfg(test)]
use aes::cipher::BlockEncryptMut;
use aes::Aes256;
use anyhow::{anyhow, Result};
use base64::alphabet;
use base64::engine::{GeneralPurpose, GeneralPurposeConfig};
use base64::Engine;
use quick_xml::events::Event;
use quick_xml::Reader as XmlReader;
use sha1::{Digest, Sha1};
use std::collections::HashMap;

type Aes256CbcDec = cbc::Decryptor<Aes256>;
#[cfg(test)]
type Aes256CbcEnc = cbc::Encryptor<Aes256>;

// EncodingAESKey 由后台随机生成，末位常带多余比特，解码时需放宽。
const AES_KEY_ENGINE: GeneralPurpose = GeneralPurpose::new(
    &alphabet::STANDARD,
    GeneralPurposeConfig::new().with_decode_allow_trailing_bits(true),
);

// 企业微信的 PKCS#7 以 32 字节为块长，不能直接用 16 字节块的标准去填充。
const PAD_BLOCK: usize = 32;

/// 任一参与签名的字段为空都视为校验失败。
pub fn verify_signature(
    token: &str,
    timestamp: &str,
    nonce: &str,
    encrypted: &str,
    signature: &str,
) -> bool {
    let [token, timestamp, nonce, encrypted] = [token, timestamp, nonce, encrypted].map(str::trim);
    let signature = signature.trim();
    if signature.is_empty() || [token, timestamp, nonce, encrypted].iter().any(|part| part.is_empty()) {
        return false;
    }
    signature_of(token, timestamp, nonce, encrypted).eq_ignore_ascii_case(signature)
}

pub fn signature_of(token: &str, timestamp: &str, nonce: &str, encrypted: &str) -> String {
    let mut parts = [token, timestamp, nonce, encrypted];
    parts.sort_unstable();
    let mut hasher = Sha1::new();
    for part in parts {
        hasher.update(part.as_bytes());
    }
    hex::encode(hasher.finalize())
}

pub fn decrypt_payload(
    encrypted: &str,
    encoding_aes_key: &str,
    expected_receive_id: Option<&str>,
) -> Result<String> {
    let key = decode_encoding_aes_key(encoding_aes_key)?;
    let encrypted = encrypted.trim();
    if encrypted.is_empty() {
        return Err(anyhow!("wecom encrypted payload is empty"));
    }
    let mut buffer = base64::engine::general_purpose::STANDARD
        .decode(encrypted)
        .map_err(|_| anyhow!("wecom encrypted payload is not valid base64"))?;
    if buffer.is_empty() {
        return Err(anyhow!("wecom encrypted payload is empty"));
    }

    let iv = &key[..16];
    let decrypted = Aes256CbcDec::new(key.as_slice().into(), iv.into())
        .decrypt_padded_mut::<NoPadding>(&mut buffer)
        .map_err(|_| anyhow!("wecom payload decrypt failed"))?;
    let plain = strip_padding(decrypted)?;
    if plain.len() < 20 {
        return Err(anyhow!("wecom payload is too short"));
    }
    let msg_len: [u8; 4] = plain[16..20]
        .try_into()
        .map_err(|_| anyhow!("wecom payload length parse failed"))?;
    let msg_len = u32::from_be_bytes(msg_len) as usize;
    let msg_start = 20;
    let msg_end = msg_start + msg_len;
    if msg_end > plain.len() {
        return Err(anyhow!("wecom payload length out of range"));
    }

    let receive_id = String::from_utf8_lossy(&plain[msg_end..]).trim().to_string();
    if let Some(expected) = expected_receive_id
        .map(str::trim)
        .filter(|value| !value.is_empty())
    {
        if receive_id != expected {
            return Err(anyhow!("wecom payload receive_id mismatch"));
        }
    }

    String::from_utf8(plain[msg_start..msg_end].to_vec())
        .map_err(|_| anyhow!("wecom payload body is not utf-8"))
}

/// 按回调信封格式加密，用于构造测试回调；`random` 为 16 字节随机前缀。
#[cfg(test)]
pub(crate) fn encrypt_payload(
    message: &str,
    encoding_aes_key: &str,
    receive_id: &str,
    random: [u8; 16],
) -> Result<String> {
    let key = decode_encoding_aes_key(encoding_aes_key)?;
    let msg_len = u32::try_from(message.len()).map_err(|_| anyhow!("wecom message too long"))?;
    let mut plain = Vec::with_capacity(20 + message.len() + receive_id.len() + PAD_BLOCK);
    plain.extend_from_slice(&random);
    plain.extend_from_slice(&msg_len.to_be_bytes());
    plain.extend_from_slice(message.as_bytes());
    plain.extend_from_slice(receive_id.as_bytes());
    let pad = PAD_BLOCK - plain.len() % PAD_BLOCK;
    plain.extend(std::iter::repeat(pad as u8).take(pad));

    let iv = &key[..16];
    let length = plain.len();
    let cipher_text = Aes256CbcEnc::new(key.as_slice().into(), iv.into())
        .encrypt_padded_mut::<NoPadding>(&mut plain, length)
        .map_err(|_| anyhow!("wecom payload encrypt failed"))?;
    Ok(base64::engine::general_purpose::STANDARD.encode(cipher_text))
}

fn strip_padding(plain: &[u8]) -> Result<&[u8]> {
    let pad = plain.last().copied().map(usize::from).unwrap_or(0);
    if pad == 0 || pad > PAD_BLOCK || pad > plain.len() {
        return Err(anyhow!("wecom payload padding invalid"));
    }
    Ok(&plain[..plain.len() - pad])
}

pub fn decode_encoding_aes_key(raw: &str) -> Result<Vec<u8>> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err(anyhow!("wecom encoding_aes_key missing"));
    }
    let padded = if raw.ends_with('=') {
        raw.to_string()
    } else {
        format!("{raw}=")
    };
    let key = AES_KEY_ENGINE
        .decode(padded)
        .map_err(|_| anyhow!("wecom encoding_aes_key is invalid base64"))?;
    if key.len() != 32 {
        return Err(anyhow!("wecom encoding_aes_key length invalid"));
    }
    Ok(key)
}

/// 取根节点下各子元素的文本，CDATA 与普通文本都会拼接进同一字段。
pub fn parse_xml_fields(xml: &str) -> Result<HashMap<String, String>> {
    let mut reader = XmlReader::from_str(xml);
    reader.trim_text(true);
    let mut fields = HashMap::new();
    let mut open_tag: Option<String> = None;
    let mut text = String::new();

    loop {
        let event = reader
            .read_event()
            .map_err(|err| anyhow!("callback xml is malformed: {err}"))?;
        match event {
            Event::Start(tag) => {
                open_tag = Some(String::from_utf8_lossy(tag.local_name().as_ref()).into_owned());
                text.clear();
            }
            Event::Text(chunk) => {
                let chunk = chunk
                    .unescape()
                    .map_err(|err| anyhow!("callback xml text is invalid: {err}"))?;
                text.push_str(&chunk);
            }
            Event::CData(chunk) => text.push_str(&String::from_utf8_lossy(&chunk)),
            Event::End(_) => {
                if let Some(name) = open_tag.take() {
                    let value = text.trim();
                    if !value.is_empty() {
                        fields.insert(name, value.to_string());
                    }
                }
                text.clear();
            }
            Event::Eof => break,
            _ => {}
        }
    }
    Ok(fields)
}

/// 回调里解析出的一条消息或事件。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundEvent {
    pub from_user: String,
    pub to_user: Option<String>,
    pub create_time: Option<i64>,
    pub msg_id: Option<String>,
    pub agent_id: Option<String>,
    pub msg_type: String,
    pub event: Option<String>,
    pub content: Option<String>,
}

impl InboundEvent {
    pub fn from_xml(xml: &str) -> Result<Self> {
        Self::from_fields(&parse_xml_fields(xml)?)
    }

    pub fn from_fields(fields: &HashMap<String, String>) -> Result<Self> {
        let field = |name: &str| {
            fields
                .get(name)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };
        let from_user =
            field("FromUserName").ok_or_else(|| anyhow!("invalid wecom payload: missing FromUserName"))?;
        Ok(Self {
            from_user,
            to_user: field("ToUserName"),
            create_time: field("CreateTime").and_then(|value| value.parse::<i64>().ok()),
            msg_id: field("MsgId").or_else(|| field("MsgID")),
            agent_id: field("AgentID"),
            msg_type: field("MsgType")
                .map(|value| value.to_ascii_lowercase())
                .unwrap_or_default(),
            event: field("Event"),
            content: field("Content"),
        })
    }

    pub fn is_text(&self) -> bool {
        self.msg_type == "text"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const AES_KEY: &str = "jWmYm7qr5nMoAUwZRjGtBxmz3KA1tkAj3ykkR6q2B2C";

    #[test]
    fn verify_signature_with_sorted_parts() {
        let token = "token";
        let timestamp = "1710000000";
        let nonce = "abc";
        let encrypted = "cipher_text";
        let mut parts = [token, timestamp, nonce, encrypted];
        parts.sort_unstable();
        let mut hasher = Sha1::new();
        for part in parts {
            hasher.update(part.as_bytes());
        }
        let signature = hex::encode(hasher.finalize());
        assert!(verify_signature(token, timestamp, nonce, encrypted, &signature));
        assert!(!verify_signature(token, timestamp, nonce, "tampered", &signature));
        assert!(!verify_signature(token, "", nonce, encrypted, &signature));
    }

    #[test]
    fn decrypt_restores_message_with_wide_padding() {
        // 长度让填充值超过 16，覆盖 32 字节块填充。
        for message in ["<xml>a</xml>", "<xml><Content>你好</Content></xml>", ""] {
            let encrypted =
                encrypt_payload(message, AES_KEY, "wx5823bf96d3bd56c7", [9u8; 16]).expect("encrypt");
            let plain =
                decrypt_payload(&encrypted, AES_KEY, Some("wx5823bf96d3bd56c7")).expect("decrypt");
            assert_eq!(plain, message);
        }
    }

    #[test]
    fn decrypt_rejects_foreign_receive_id() {
        let encrypted = encrypt_payload("<xml/>", AES_KEY, "corp-a", [1u8; 16]).expect("encrypt");
        assert!(decrypt_payload(&encrypted, AES_KEY, Some("corp-b")).is_err());
        assert!(decrypt_payload(&encrypted, AES_KEY, None).is_ok());
        assert!(decrypt_payload("not base64!", AES_KEY, None).is_err());
    }

    #[test]
    fn aes_key_must_decode_to_32_bytes() {
        assert_eq!(decode_encoding_aes_key(AES_KEY).expect("key").len(), 32);
        assert!(decode_encoding_aes_key("short").is_err());
        assert!(decode_encoding_aes_key("  ").is_err());
    }

    #[test]
    fn parse_xml_fields_extracts_text() {
        let xml =
            "<xml><MsgType><![CDATA[text]]></MsgType><Content><![CDATA[hello]]></Content></xml>";
        let fields = parse_xml_fields(xml).expect("xml should parse");
        assert_eq!(fields.get("MsgType").cloned(), Some("text".to_string()));
        assert_eq!(fields.get("Content").cloned(), Some("hello".to_string()));
    }

    #[test]
    fn parse_xml_fields_handles_entities_and_rejects_broken_markup() {
        let xml = "<xml><Content>a &amp; b</Content><Empty></Empty><MsgId>7</MsgId></xml>";
        let fields = parse_xml_fields(xml).expect("xml should parse");
        assert_eq!(fields.get("Content").map(String::as_str), Some("a & b"));
        assert_eq!(fields.get("MsgId").map(String::as_str), Some("7"));
        assert!(!fields.contains_key("Empty"));
        assert!(parse_xml_fields("<xml><Content>x</Other></xml>").is_err());
    }

    #[test]
    fn inbound_event_from_text_message() {
        let xml = "<xml><ToUserName><![CDATA[ww123]]></ToUserName><FromUserName><![CDATA[u1]]></FromUserName><CreateTime>1710000000</CreateTime><MsgType><![CDATA[text]]></MsgType><Content><![CDATA[echo 你好]]></Content><MsgId>1234567890</MsgId><AgentID>1000002</AgentID></xml>";
        let event = InboundEvent::from_xml(xml).expect("event");
        assert!(event.is_text());
        assert_eq!(event.from_user, "u1");
        assert_eq!(event.content.as_deref(), Some("echo 你好"));
        assert_eq!(event.create_time, Some(1_710_000_000));
        assert_eq!(event.msg_id.as_deref(), Some("1234567890"));
        assert_eq!(event.agent_id.as_deref(), Some("1000002"));
    }

    #[test]
    fn inbound_event_keeps_non_text_events() {
        let xml = "<xml><FromUserName><![CDATA[u1]]></FromUserName><MsgType><![CDATA[event]]></MsgType><Event><![CDATA[enter_agent]]></Event></xml>";
        let event = InboundEvent::from_xml(xml).expect("event");
        assert!(!event.is_text());
        assert_eq!(event.event.as_deref(), Some("enter_agent"));
        assert!(InboundEvent::from_xml("<xml><MsgType>text</MsgType></xml>").is_err());
    }
}
