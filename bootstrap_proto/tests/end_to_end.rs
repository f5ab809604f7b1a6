// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

#![cfg(unix)]

use bootstrap_proto::client::*;
use bootstrap_proto::cmd::{OtpRegion, SJTAG_LEN};
use bootstrap_proto::frame::PayloadMode;
use bootstrap_proto::monitor::{Exit, Monitor, MonitorConfig, NackReason};
use bootstrap_proto::sim::SimBoard;
use bootstrap_proto::Error;
use otp_tags::provision::Manifest;
use otp_tags::TagStore;
use pretty_assertions::assert_eq;
use std::os::unix::net::UnixStream;
use std::thread;

/// Runs the monitor on a thread and hands the host end to `host`.
fn with_device<F>(board: SimBoard, host: F) -> (SimBoard, Exit)
where
    F: FnOnce(&mut UnixStream),
{
    let (mut host_end, mut device_end) = UnixStream::pair().unwrap();

    let device = thread::spawn(move || {
        let mut board = board;
        let exit = Monitor::new(&mut board, MonitorConfig::default())
            .run(&mut device_end)
            .unwrap();
        (board, exit)
    });

    host(&mut host_end);
    device.join().unwrap()
}

#[test]
fn download_authenticate_boot() {
    let image = SimBoard::seal_image(&(0..3000).map(|i| i as u8).collect::<Vec<_>>());
    let expected = image.clone();

    let (board, exit) = with_device(SimBoard::new(), move |port| {
        assert!(do_version(port).unwrap().starts_with("bootstrap-sim"));
        do_download(port, &image, 700, PayloadMode::Hex).unwrap();
        do_authenticate(port).unwrap();
        do_write_fip(port).unwrap();
        do_continue(port).unwrap();
    });

    assert_eq!(exit, Exit::Continue);
    assert!(board.authenticated);
    assert_eq!(board.fip, Some(expected));
}

#[test]
fn binary_download_with_failures() {
    let (board, exit) = with_device(SimBoard::new(), |port| {
        // Nothing downloaded yet
        assert!(matches!(
            do_authenticate(port),
            Err(Error::Nack(NackReason::NoImage))
        ));

        // Bad digest
        let image = vec![0x3e; 200];
        do_download(port, &image, 64, PayloadMode::Binary).unwrap();
        assert!(matches!(
            do_authenticate(port),
            Err(Error::Nack(NackReason::AuthFailed))
        ));

        // Larger than any single frame the device accepts
        assert!(matches!(
            do_download(port, &[0; 2048], 2048, PayloadMode::Binary),
            Err(Error::Nack(NackReason::TooMuchData))
        ));

        do_reset(port).unwrap();
    });

    assert_eq!(exit, Exit::Reset);
    assert_eq!(board.resets, 1);
    assert!(!board.authenticated);
}

#[test]
fn provision_tags_and_read_back() {
    let manifest = Manifest::from_toml(
        r#"
        [[tag]]
        type = "board-name"
        text = "bench-board"

        [[tag]]
        type = "mac-address"
        hex = "02:00:00:00:00:01"
        "#,
    )
    .unwrap();
    let blob = manifest.render().unwrap();
    let base = manifest.base as u32;

    let (board, _) = with_device(SimBoard::new(), move |port| {
        do_otp_program(port, base, &blob).unwrap();
        do_otp_regions(
            port,
            &[OtpRegion {
                offset: 0x10,
                data: &[0xaa, 0x55],
            }],
        )
        .unwrap();
        do_otp_random(port, 0x40, 16).unwrap();

        // Visible through the emulation only
        assert_eq!(do_otp_read(port, 0x10, 2, true).unwrap(), vec![0xaa, 0x55]);
        assert_eq!(do_otp_read(port, 0x10, 2, false).unwrap(), vec![0, 0]);

        do_otp_commit(port).unwrap();
        assert_eq!(do_otp_read(port, 0x10, 2, false).unwrap(), vec![0xaa, 0x55]);
        do_continue(port).unwrap();
    });

    let store = TagStore::new(&board.otp[..]);
    let mut name = [0u8; 32];
    let n = store.get(1, &mut name).unwrap();
    assert_eq!(&name[..n], b"bench-board");

    let mut mac = [0u8; 6];
    assert_eq!(store.get(4, &mut mac), Ok(6));
    assert_eq!(mac, [2, 0, 0, 0, 0, 1]);
}

#[test]
fn sjtag_unlock() {
    let key = [0x17u8; SJTAG_LEN];
    let board = SimBoard::new().with_sjtag_key(key);

    let (board, _) = with_device(board, move |port| {
        assert!(matches!(
            do_sjtag_unlock(port, &[0; SJTAG_LEN]),
            Err(Error::Nack(NackReason::SjtagUnlock))
        ));
        do_sjtag_unlock(port, &key).unwrap();
        do_continue(port).unwrap();
    });

    assert!(board.sjtag_unlocked);
}
