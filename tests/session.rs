use std::time::Duration;
use rtpmidi::control::ControlKind;
use rtpmidi::rtp::{MidiCommand, MidiCommands, MidiMessage};
use rtpmidi::session::{Channel, ConnectionState};
use rtpmidi::test_util::{rtp_packet, start_local_session, FakePeer};
use tokio::sync::mpsc;
use tokio::time::{sleep, timeout};
use tracing::Level;

#[ctor::ctor]
fn init_test_logging() {
    tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(Level::DEBUG)
        .try_init()
        .ok();
}

#[tokio::test]
async fn test_session_round_trip() {
    let session = start_local_session("integration").await.unwrap();

    let (tx, mut rx) = mpsc::unbounded_channel();
    session.handle(move |m: MidiMessage| { tx.send(m).ok(); });

    let keyboard = FakePeer::bind(0x1111, "keyboard").await.unwrap();
    let synth = FakePeer::bind(0x2222, "synth").await.unwrap();
    keyboard.invite(session.port()).await.unwrap();
    synth.invite(session.port()).await.unwrap();
    assert_eq!(session.connections().len(), 2);

    // keyboard -> session: running status, a SysEx and a delta-time
    keyboard.send_data(session.port(), &rtp_packet(1, 0x1111, &[
        0x0b,
        0x90, 0x3c, 0x40,
        0x00, 0x3e, 0x40,
        0x05, 0xf0, 0x7e, 0x01, 0xf7,
    ])).await.unwrap();

    let received = timeout(Duration::from_secs(2), rx.recv()).await.unwrap().unwrap();
    assert_eq!(received.ssrc, 0x1111);
    let payloads = received.commands.iter().map(|c| c.payload.to_vec()).collect::<Vec<_>>();
    assert_eq!(payloads, vec![
        vec![0x90, 0x3c, 0x40],
        vec![0x90, 0x3e, 0x40],
        vec![0xf0, 0x7e, 0x01, 0xf7],
    ]);
    assert_eq!(received.commands.commands[2].delta_time, Duration::from_millis(5));

    // session -> everybody
    let commands = MidiCommands::new(vec![
        MidiCommand::new(vec![0xb0, 0x07, 0x64]),
        MidiCommand::with_delta(Duration::from_millis(10), vec![0xc0, 0x02]),
    ]);
    assert_eq!(session.send_commands(commands).await.unwrap(), 2);
    for peer in [&keyboard, &synth] {
        let message = peer.recv_data().await.unwrap();
        assert_eq!(message.ssrc, session.ssrc());
        assert_eq!(message.sequence_number, session.sequence_number());
        let payloads = message.commands.iter().map(|c| c.payload.to_vec()).collect::<Vec<_>>();
        assert_eq!(payloads, vec![vec![0xb0, 0x07, 0x64], vec![0xc0, 0x02]]);
        assert_eq!(message.commands.commands[1].delta_time, Duration::from_millis(10));
    }

    // keyboard leaves
    let keyboard_connection = session.connection(0x1111).unwrap();
    keyboard.send_control(session.port(), Channel::Control, &keyboard.end()).await.unwrap();
    for _ in 0..200 {
        if session.connection(0x1111).is_none() {
            break;
        }
        sleep(Duration::from_millis(10)).await;
    }
    assert!(session.connection(0x1111).is_none());
    assert_eq!(keyboard_connection.state().await, ConnectionState::Ended);

    // its data is no longer delivered
    keyboard.send_data(session.port(), &rtp_packet(2, 0x1111, &[0x03, 0x80, 0x3c, 0x00])).await.unwrap();
    assert_eq!(session.send_payload(&[0xfa]).await.unwrap(), 1);
    synth.recv_data().await.unwrap();
    assert!(rx.try_recv().is_err());

    let session_ssrc = session.ssrc();
    session.end().await;

    let bye = synth.recv_control(Channel::Control).await.unwrap();
    assert_eq!(bye.kind(), ControlKind::End);
    assert_eq!(bye.ssrc(), session_ssrc);
}

#[tokio::test]
async fn test_invitations_after_end_are_ignored() {
    let session = start_local_session("ending").await.unwrap();
    let port = session.port();
    session.end().await;

    let peer = FakePeer::bind(0x3333, "late").await.unwrap();
    peer.send_control(port, Channel::Control, &peer.invitation()).await.unwrap();
    assert!(peer.recv_control(Channel::Control).await.is_err());
}
