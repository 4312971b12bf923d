use aes::{
    cipher::{BlockEncrypt, KeyInit, StreamCipher},
    Aes256Enc,
};
use ethereum_types::H128;
use ethlink_rlp::encode::RLPEncode;
use sha3::Digest;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use super::connection::Established;
use super::error::RLPxError;

/// Writes one RLPx frame (header + body + MACs) to `stream`, per §5's framing layer.
pub(crate) async fn write<S: AsyncWrite + Unpin>(
    mut frame_data: Vec<u8>,
    state: &mut Established,
    stream: &mut S,
) -> Result<(), RLPxError> {
    let mac_aes_cipher = Aes256Enc::new_from_slice(&state.mac_key.0)?;

    // header = frame-size || header-data || header-padding
    let mut header = Vec::with_capacity(32);
    let frame_size = frame_data.len().to_be_bytes();
    header.extend_from_slice(&frame_size[5..8]);

    // header-data = [capability-id, context-id], both always zero: we only ever
    // multiplex a single capability (`eth`) onto this connection.
    let header_data = (0_u8, 0_u8);
    header_data.encode(&mut header);

    header.resize(16, 0);
    state.egress_aes.apply_keystream(&mut header[..16]);

    let header_mac_seed = {
        let mac_digest: [u8; 16] = state.egress_mac.clone().finalize()[..16].try_into().unwrap();
        let mut seed = mac_digest.into();
        mac_aes_cipher.encrypt_block(&mut seed);
        H128(seed.into()) ^ H128(header[..16].try_into().unwrap())
    };
    state.egress_mac.update(header_mac_seed);
    let header_mac = state.egress_mac.clone().finalize();
    header.extend_from_slice(&header_mac[..16]);

    stream.write_all(&header).await?;

    // Pad to the next multiple of 16 bytes before encrypting.
    frame_data.resize(frame_data.len().next_multiple_of(16), 0);
    state.egress_aes.apply_keystream(&mut frame_data);
    let frame_ciphertext = frame_data;

    stream.write_all(&frame_ciphertext).await?;

    state.egress_mac.update(&frame_ciphertext);
    let frame_mac_seed = {
        let mac_digest: [u8; 16] = state.egress_mac.clone().finalize()[..16].try_into().unwrap();
        let mut seed = mac_digest.into();
        mac_aes_cipher.encrypt_block(&mut seed);
        (H128(seed.into()) ^ H128(mac_digest)).0
    };
    state.egress_mac.update(frame_mac_seed);
    let frame_mac = state.egress_mac.clone().finalize();

    stream.write_all(&frame_mac[..16]).await?;
    Ok(())
}

/// Reads and decrypts one RLPx frame, verifying both header and frame MACs before
/// returning the plaintext payload.
pub(crate) async fn read<S: AsyncRead + Unpin>(
    state: &mut Established,
    stream: &mut S,
) -> Result<Vec<u8>, RLPxError> {
    let mac_aes_cipher = Aes256Enc::new_from_slice(&state.mac_key.0)?;

    let mut frame_header = [0; 32];
    stream.read_exact(&mut frame_header).await?;
    let (header_ciphertext, header_mac) = frame_header.split_at_mut(16);

    let header_mac_seed = {
        let mac_digest: [u8; 16] = state.ingress_mac.clone().finalize()[..16].try_into().unwrap();
        let mut seed = mac_digest.into();
        mac_aes_cipher.encrypt_block(&mut seed);
        (H128(seed.into()) ^ H128(header_ciphertext.try_into().unwrap())).0
    };
    state.ingress_mac.update(header_mac_seed);
    let expected_header_mac = H128(
        state.ingress_mac.clone().finalize()[..16]
            .try_into()
            .unwrap(),
    );
    if header_mac != expected_header_mac.0 {
        return Err(RLPxError::Cryptography("frame header mac mismatch".into()));
    }

    let header_text = header_ciphertext;
    state.ingress_aes.apply_keystream(header_text);

    if header_text[3..6] != (0_u8, 0_u8).encode_to_vec()[..] {
        return Err(RLPxError::Cryptography(
            "unexpected non-zero frame header-data".into(),
        ));
    }

    let frame_size: usize =
        u32::from_be_bytes([0, header_text[0], header_text[1], header_text[2]]) as usize;
    let padded_size = frame_size.next_multiple_of(16);
    let mut frame_data = vec![0; padded_size + 16];
    stream.read_exact(&mut frame_data).await?;
    let (frame_ciphertext, frame_mac) = frame_data.split_at_mut(padded_size);

    state.ingress_mac.update(&frame_ciphertext[..]);
    let frame_mac_seed = {
        let mac_digest: [u8; 16] = state.ingress_mac.clone().finalize()[..16].try_into().unwrap();
        let mut seed = mac_digest.into();
        mac_aes_cipher.encrypt_block(&mut seed);
        (H128(seed.into()) ^ H128(mac_digest)).0
    };
    state.ingress_mac.update(frame_mac_seed);
    let expected_frame_mac: [u8; 16] = state.ingress_mac.clone().finalize()[..16]
        .try_into()
        .unwrap();
    if frame_mac != expected_frame_mac {
        return Err(RLPxError::Cryptography("frame mac mismatch".into()));
    }

    state.ingress_aes.apply_keystream(frame_ciphertext);
    let (frame_data, _padding) = frame_ciphertext.split_at(frame_size);

    Ok(frame_data.to_vec())
}
