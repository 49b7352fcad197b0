use std::sync::Arc;
use std::time::Duration;

use journeygrid::{
    providers::scripted::ScriptedProvider,
    relay::{classify_completion, server, Completion, CompletionOutcome, PROVIDER_FAILURE},
    ContextAction, EditorSession, Grid, RelayClient, RelayService, ServerEvent,
    StructuredScenario,
};
use tokio::net::TcpListener;

const REPLY: &str = concat!("```json\n", include_str!("fixtures/two_rows.json"), "```");

async fn spawn_relay(provider: ScriptedProvider) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    let state = RelayService::new(Arc::new(provider), "gpt-4o")
        .expect("service")
        .into_state();
    tokio::spawn(server::serve(listener, state));
    format!("ws://{addr}/api/socket")
}

async fn next_event(events: &mut journeygrid::RelayEvents) -> ServerEvent {
    tokio::time::timeout(Duration::from_secs(5), events.recv())
        .await
        .expect("reply in time")
        .expect("relay still open")
}

async fn next_completion(events: &mut journeygrid::RelayEvents) -> Completion {
    match next_event(events).await {
        ServerEvent::Completion(completion) => completion,
        other => panic!("expected a completion, got {other:?}"),
    }
}

#[tokio::test]
async fn prompt_over_websocket_returns_correlated_document() {
    let url = spawn_relay(ScriptedProvider::from_responses([REPLY])).await;
    let (client, mut events) = RelayClient::connect(&url).await.expect("connect");

    let request_id = client
        .send_prompt("Wake up, order a taxi and ride to the office")
        .expect("send");
    let completion = next_completion(&mut events).await;

    assert_eq!(completion.request_id, Some(request_id));
    match classify_completion(&completion.text) {
        CompletionOutcome::Document(document) => {
            assert_eq!(document.rows.len(), 2);
            assert_eq!(document.member_ids(), vec!["001".to_string()]);
        }
        CompletionOutcome::Failure(message) => panic!("unexpected failure {message}"),
    }

    client.disconnect().await;
}

#[tokio::test]
async fn provider_failure_reaches_the_client_verbatim() {
    let provider = ScriptedProvider::new();
    provider.push_failure("quota exceeded");
    let url = spawn_relay(provider).await;
    let (client, mut events) = RelayClient::connect(&url).await.expect("connect");

    client.send_prompt("anything").expect("send");
    let completion = next_completion(&mut events).await;

    assert_eq!(completion.text, PROVIDER_FAILURE);
    assert!(matches!(
        classify_completion(&completion.text),
        CompletionOutcome::Failure(text) if text == PROVIDER_FAILURE
    ));

    client.disconnect().await;
}

#[tokio::test]
async fn placements_do_not_disturb_prompt_traffic() {
    let url = spawn_relay(ScriptedProvider::from_responses([REPLY])).await;
    let (client, mut events) = RelayClient::connect(&url).await.expect("connect");

    let mut grid = Grid::with_seed(9);
    grid.subscribe(Arc::new(client.placement_notifier().expect("notifier")));
    let origin = grid.add_node(0, 0).expect("node");
    grid.add_linked_node(&origin);

    let request_id = client.send_prompt("commute").expect("send");
    let completion = next_completion(&mut events).await;
    assert_eq!(completion.request_id, Some(request_id));

    tokio::time::timeout(Duration::from_secs(5), client.disconnect())
        .await
        .expect("disconnect while the grid still holds the notifier");
    grid.add_node(1, 1).expect("placement after disconnect is dropped");
}

#[tokio::test]
async fn session_with_attached_relay_closes() {
    let url = spawn_relay(ScriptedProvider::new()).await;
    let (client, _events) = RelayClient::connect(&url).await.expect("connect");

    let mut session = EditorSession::new(Grid::with_seed(3)).with_seed(3);
    session.attach_relay(client).await;
    session
        .apply(ContextAction::AddUser { row: 0, col: 0 })
        .await
        .expect("node");

    tokio::time::timeout(Duration::from_secs(5), session.close())
        .await
        .expect("close returns");
}

#[tokio::test]
async fn storyboard_over_websocket_keeps_five_scenes() {
    let scenes: Vec<String> = (1..=6)
        .map(|id| format!(r#"{{"sceneId":{id},"title":"Scene {id}","keyInteractions":[]}}"#))
        .collect();
    let reply = format!(r#"{{"storyboards":[{}]}}"#, scenes.join(","));
    let url = spawn_relay(ScriptedProvider::from_responses([reply])).await;
    let (client, mut events) = RelayClient::connect(&url).await.expect("connect");

    let request_id = client.request_storyboard("commute").expect("send");
    match next_event(&mut events).await {
        ServerEvent::StoryboardResult(reply) => {
            assert_eq!(reply.request_id, Some(request_id));
            let storyboard = reply.into_result().expect("storyboard");
            assert_eq!(storyboard.storyboards.len(), 5);
            assert_eq!(storyboard.storyboards[4].title, "Scene 5");
        }
        other => panic!("unexpected event {other:?}"),
    }

    client.disconnect().await;
}

#[tokio::test]
async fn structured_breakdown_is_written_back_over_websocket() {
    let url = spawn_relay(ScriptedProvider::from_responses([
        "Mina leaves the lobby and orders a taxi.",
    ]))
    .await;
    let (client, mut events) = RelayClient::connect(&url).await.expect("connect");

    let mut structured = StructuredScenario {
        context: vec!["Lobby".into()],
        ..Default::default()
    };
    structured.set_user_experience("001", "Orders a taxi");
    let request_id = client.convert_structured(&structured).expect("send");

    match next_event(&mut events).await {
        ServerEvent::ConvertedScenario(completion) => {
            assert_eq!(completion.request_id, Some(request_id));
            assert_eq!(completion.text, "Mina leaves the lobby and orders a taxi.");
        }
        other => panic!("unexpected event {other:?}"),
    }

    client.disconnect().await;
}
