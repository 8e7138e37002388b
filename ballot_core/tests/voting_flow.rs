use ballot_core::{
    admin::{AdminGate, ImageSource, ParticipantDraft},
    catalog::load_catalog,
    data::{Table, VoterIdentifier},
    gateway::{
        memory::{MemoryGateway, Operation},
        ImageUpload,
    },
    realtime::RealtimeRefresh,
    submit::{Ballot, SubmitStrategy},
    tally::fetch_tally,
    voter::VoterStore,
};

fn draft(category: &ballot_core::data::CategoryId, name: &str) -> ParticipantDraft {
    ParticipantDraft {
        category_id: category.clone(),
        name: name.to_owned(),
        description: None,
        image: None,
    }
}

#[tokio::test]
async fn admin_setup_votes_and_live_results() {
    let backend = MemoryGateway::new();

    // an administrator sets up the event
    let admin_client = backend.clone();
    let gate = AdminGate::new(Some("letmein".to_owned()));
    let console = gate.unlock(&admin_client, "letmein").unwrap();
    let act = console
        .add_category("Best Act", Some("live performances"))
        .await
        .unwrap();
    let video = console.add_category("Best Video", None).await.unwrap();
    let band = console
        .add_participant(draft(&act.id, "The Band"))
        .await
        .unwrap();
    let solo = console
        .add_participant(ParticipantDraft {
            image: Some(ImageSource::Upload(ImageUpload {
                file_name: "solo.jpg".to_owned(),
                content_type: "image/jpeg".to_owned(),
                bytes: vec![0xff, 0xd8, 0xff],
            })),
            ..draft(&act.id, "Solo Artist")
        })
        .await
        .unwrap();
    let clip = console
        .add_participant(draft(&video.id, "The Clip"))
        .await
        .unwrap();
    assert!(solo.image_url.is_some());

    // the results view is open from the start
    let results_client = backend.clone();
    let mut refresh = RealtimeRefresh::mount(&results_client, &Table::ALL).await;
    assert!(refresh.is_live());
    let initial = refresh.refresh().await.unwrap();
    assert_eq!(initial.catalog.len(), 2);
    assert!(initial.tally.results.iter().all(|c| c.total_votes == 0));

    // a voter on a fresh device sees the catalog and votes in both categories
    let dir = tempfile::tempdir().unwrap();
    let store = VoterStore::new(dir.path().join("voter_id"));
    let voter = store.load_or_create().unwrap();
    let voter_client = backend.clone();
    let catalog = load_catalog(&voter_client).await.unwrap();
    assert_eq!(catalog[0].category.name, "Best Act");
    assert_eq!(catalog[0].participants.len(), 2);

    let mut ballot = Ballot::new();
    ballot.select(act.id.clone(), band.id.clone()).unwrap();
    ballot.select(video.id.clone(), clip.id.clone()).unwrap();
    ballot
        .submit(&voter_client, &voter, SubmitStrategy::Replace)
        .await
        .unwrap();

    // another voter picks the solo artist
    let other = VoterIdentifier::generate();
    let mut other_ballot = Ballot::new();
    other_ballot
        .select(act.id.clone(), solo.id.clone())
        .unwrap();
    other_ballot
        .submit(&voter_client, &other, SubmitStrategy::Replace)
        .await
        .unwrap();

    // the results view follows every vote
    let mut latest = None;
    for _ in 0..3 {
        latest = Some(refresh.next_snapshot().await.unwrap().unwrap());
    }
    let tally = latest.unwrap().tally;
    assert_eq!(tally.results[0].total_votes, 2);
    let act_results = &tally.results[0].participants;
    let percentages: Vec<_> = act_results.iter().map(|p| p.percentage).collect();
    assert_eq!(percentages, [50, 50]);
    // a tie; the participant created first stays on top and leads
    assert_eq!(tally.results[0].participants[0].id, band.id);
    assert!(tally.results[0].participants[0].leading);
    assert!(!tally.results[0].participants[1].leading);
    assert_eq!(tally.results[1].total_votes, 1);

    // the first voter reloads on the same device and changes their mind
    let same_voter = VoterStore::new(dir.path().join("voter_id"))
        .load_or_create()
        .unwrap();
    assert_eq!(same_voter, voter);
    let mut revote = Ballot::new();
    revote.select(act.id.clone(), solo.id.clone()).unwrap();
    revote
        .submit(&voter_client, &same_voter, SubmitStrategy::Replace)
        .await
        .unwrap();

    let tally = refresh.next_snapshot().await.unwrap().unwrap().tally;
    assert_eq!(tally.results[0].total_votes, 2);
    assert_eq!(tally.results[0].participants[0].id, solo.id);
    assert_eq!(tally.results[0].participants[0].votes, 2);
    assert_eq!(tally.results[0].participants[0].percentage, 100);
    assert!(tally.results[0].participants[0].leading);

    // the dashboard agrees
    assert_eq!(console.stats().await.votes, 3);

    // removing a category takes its votes along
    console.delete_category(&video.id).await.unwrap();
    let tally = fetch_tally(&voter_client).await.unwrap();
    assert_eq!(tally.results.len(), 1);
    assert_eq!(console.stats().await.votes, 2);
}

#[tokio::test]
async fn revote_without_delete_rights_needs_a_unique_key() {
    let backend = MemoryGateway::new();
    backend.deny(Table::Votes, Operation::Delete);
    backend.enforce_unique_vote_key();
    let gate = AdminGate::new(Some("letmein".to_owned()));
    let console = gate.unlock(&backend, "letmein").unwrap();
    let act = console.add_category("Best Act", None).await.unwrap();
    let band = console
        .add_participant(draft(&act.id, "The Band"))
        .await
        .unwrap();
    let solo = console
        .add_participant(draft(&act.id, "Solo Artist"))
        .await
        .unwrap();

    let voter = VoterIdentifier::generate();
    for participant in [&band, &solo] {
        let mut ballot = Ballot::new();
        ballot
            .select(act.id.clone(), participant.id.clone())
            .unwrap();
        ballot
            .submit(&backend, &voter, SubmitStrategy::Replace)
            .await
            .unwrap();
    }

    // the rejected insert fell back to an update of the existing vote
    let tally = fetch_tally(&backend).await.unwrap();
    assert_eq!(tally.results[0].total_votes, 1);
    assert_eq!(tally.results[0].participants[0].id, solo.id);
}
