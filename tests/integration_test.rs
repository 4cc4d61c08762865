#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::thread;

    use minifi_binding::stub::{self, Call, StubRecord};
    use minifi_binding::{
        retrieve_next, BindingError, FlowGraph, RpgEndpoint, Session,
        SessionConfig,
    };

    const URL: &str = "http://localhost:8080/";
    const PORT: &str = "input1";

    #[test_log::test]
    fn get_file_scenario() {
        stub::reset();
        stub::push_record(
            StubRecord::sized(42).with_attribute("filename", "watched.txt"),
        );
        let lib = stub::library();

        let mut endpoint = RpgEndpoint::create(&lib, URL, PORT).unwrap();
        let mut graph = FlowGraph::create(&endpoint).unwrap();
        let mut processor = graph.add_processor("GetFile").unwrap();
        processor
            .set_property("Input Directory", "/tmp/watch")
            .unwrap();

        let mut record = retrieve_next(&endpoint, &graph).unwrap().unwrap();
        assert_eq!(record.size(), 42);
        assert_eq!(record.attribute("filename"), Some("watched.txt"));
        assert!(retrieve_next(&endpoint, &graph).unwrap().is_none());

        record.dispose();
        graph.dispose().unwrap();
        endpoint.dispose().unwrap();

        assert_eq!(
            stub::calls(),
            vec![
                Call::CreatePort(PORT.to_owned()),
                Call::CreateInstance(URL.to_owned()),
                Call::CreateFlow,
                Call::AddProcessor("GetFile".to_owned()),
                Call::SetProperty(
                    "Input Directory".to_owned(),
                    "/tmp/watch".to_owned()
                ),
                Call::GetNextFlowFile,
                Call::GetNextFlowFile,
                Call::FreeFlowFile,
                Call::FreeFlow,
                Call::FreeInstance,
                Call::FreePort,
            ]
        );
    }

    #[test_log::test]
    fn record_with_single_attribute() {
        stub::reset();
        stub::push_record(StubRecord::sized(10).with_attribute("a", "1"));
        let session = Session::open(&stub::library(), URL, PORT).unwrap();

        let record = session.retrieve_next().unwrap().unwrap();
        let expected: HashMap<String, String> =
            HashMap::from([("a".to_owned(), "1".to_owned())]);
        assert_eq!(record.size(), 10);
        assert_eq!(record.attributes(), &expected);
    }

    #[test]
    fn teardown_out_of_order_is_refused() {
        stub::reset();
        let mut endpoint =
            RpgEndpoint::create(&stub::library(), URL, PORT).unwrap();
        let mut graph = FlowGraph::create(&endpoint).unwrap();
        let before = stub::calls().len();

        assert!(matches!(
            endpoint.dispose(),
            Err(BindingError::PreconditionViolation(_))
        ));
        assert_eq!(stub::calls().len(), before);

        graph.dispose().unwrap();
        endpoint.dispose().unwrap();
        endpoint.dispose().unwrap();
        graph.dispose().unwrap();
        assert_eq!(stub::count(&Call::FreeFlow), 1);
        assert_eq!(stub::count(&Call::FreeInstance), 1);
        assert_eq!(stub::count(&Call::FreePort), 1);
    }

    #[test]
    fn children_of_disposed_flow() {
        stub::reset();
        let endpoint =
            RpgEndpoint::create(&stub::library(), URL, PORT).unwrap();
        let mut graph = FlowGraph::create(&endpoint).unwrap();
        let mut processor = graph.add_processor("GetFile").unwrap();
        graph.dispose().unwrap();

        assert!(matches!(
            processor.set_property("Input Directory", "/tmp/watch"),
            Err(BindingError::UseAfterDispose(_))
        ));
        assert!(matches!(
            retrieve_next(&endpoint, &graph),
            Err(BindingError::UseAfterDispose(_))
        ));
    }

    #[test]
    fn configured_session() {
        stub::reset();
        let config = SessionConfig::get_file("/unused.so", URL, PORT, "/data");
        let session =
            Session::with_library(&stub::library(), &config).unwrap();

        assert_eq!(session.processors()[0].name(), "GetFile");
        assert!(session.retrieve_next().unwrap().is_none());
        session.close();
        assert_eq!(stub::calls().last(), Some(&Call::FreePort));
    }

    #[test]
    fn independent_endpoints_across_threads() {
        let workers: Vec<_> = (0..4)
            .map(|i| {
                thread::spawn(move || {
                    stub::reset();
                    stub::push_record(StubRecord::sized(i));
                    let session =
                        Session::open(&stub::library(), URL, PORT).unwrap();
                    let record = session.retrieve_next().unwrap().unwrap();
                    record.size()
                })
            })
            .collect();

        let mut sizes: Vec<u64> = workers
            .into_iter()
            .map(|worker| worker.join().unwrap())
            .collect();
        sizes.sort();
        assert_eq!(sizes, vec![0, 1, 2, 3]);
    }

    #[test]
    fn endpoint_can_move_to_another_thread() {
        stub::reset();
        let endpoint =
            RpgEndpoint::create(&stub::library(), URL, PORT).unwrap();
        let graph = FlowGraph::create(&endpoint).unwrap();

        // The stub engine is per thread, so the remote side looks empty.
        let next = thread::spawn(move || {
            let next = retrieve_next(&endpoint, &graph).map(|r| r.is_none());
            drop(graph);
            drop(endpoint);
            next
        })
        .join()
        .unwrap();
        assert!(next.unwrap());
    }
}
